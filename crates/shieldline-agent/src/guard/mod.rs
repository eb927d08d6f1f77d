//! Crash-loop guard around the boot sequence.

mod crash_loop;

pub use crash_loop::{BootOutcome, CrashGuardFlag, CrashLoopGuard, CRASH_GUARD_KEY};
