//! Filtering-level policy reconciled against permission grants.
//!
//! - `levels`: pure level arithmetic over a `PolicyConfig`.
//! - `pending`: the single-slot pending-upgrade token.
//! - `reconciler`: grant/revoke handling and level mutation.

pub mod levels;
pub mod pending;
pub mod reconciler;

pub use pending::{PendingSlot, PendingUpgradeToken};
pub use reconciler::{GrantOutcome, PolicyReconciler};
pub(crate) use reconciler::normalize_hostname;
