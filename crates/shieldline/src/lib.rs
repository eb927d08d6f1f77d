//! Top-level facade crate for shieldline.
//!
//! Re-exports the core types and the agent runtime so users can depend on a single crate.

pub mod core {
    pub use shieldline_core::*;
}

pub mod agent {
    pub use shieldline_agent::*;
}
