//! Single-slot pending-upgrade token.
//!
//! Issued when a UI asks for a level that needs a permission grant first;
//! consumed by the next grant-added event. The slot lock is never held across
//! an await, so [`PendingSlot::take`] is one indivisible test-and-clear.

use std::sync::{Mutex, MutexGuard, PoisonError};

use shieldline_core::FilteringLevel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpgradeToken {
    pub hostname: String,
    pub origin_tab_id: i64,
    pub origin_url: String,
    pub requested_level: FilteringLevel,
    /// Level of `hostname` when the token was issued.
    pub issued_at_level: FilteringLevel,
    pub generation: u64,
}

#[derive(Debug, Default)]
struct SlotState {
    token: Option<PendingUpgradeToken>,
    generation: u64,
}

#[derive(Debug, Default)]
pub struct PendingSlot {
    inner: Mutex<SlotState>,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new token, discarding any previous one. Returns its generation.
    pub fn issue(
        &self,
        hostname: String,
        origin_tab_id: i64,
        origin_url: String,
        requested_level: FilteringLevel,
        issued_at_level: FilteringLevel,
    ) -> u64 {
        let mut slot = self.lock();
        slot.generation += 1;
        let generation = slot.generation;
        if let Some(old) = slot.token.replace(PendingUpgradeToken {
            hostname,
            origin_tab_id,
            origin_url,
            requested_level,
            issued_at_level,
            generation,
        }) {
            tracing::debug!(hostname = %old.hostname, generation = old.generation, "pending upgrade superseded");
        }
        generation
    }

    /// Remove and return the live token, if any.
    pub fn take(&self) -> Option<PendingUpgradeToken> {
        self.lock().token.take()
    }

    pub fn peek(&self) -> Option<PendingUpgradeToken> {
        self.lock().token.clone()
    }
}
