//! Boot sequencing and the boot barrier.

mod barrier;
mod orchestrator;

pub use barrier::{BootBarrier, BootStatus};
pub use orchestrator::{SessionOrchestrator, SessionState};

use serde_json::Value;

use crate::store::KeyValueStore;

/// Session-store key set once per browser session.
pub const WAKE_MARKER_KEY: &str = "sessionStarted";

/// Whether this process is a dormant-process wake rather than a cold boot.
///
/// The marker lives in session storage, which the browser clears on restart;
/// finding it means an earlier process of this browser session already
/// booted. Storage failures count as a cold boot.
pub async fn detect_wakeup(session: &dyn KeyValueStore) -> bool {
    let seen = match session.read(WAKE_MARKER_KEY).await {
        Ok(v) => v.is_some(),
        Err(e) => {
            tracing::warn!(error = %e, "session marker unreadable");
            false
        }
    };
    if !seen {
        if let Err(e) = session.write(WAKE_MARKER_KEY, Value::Bool(true)).await {
            tracing::warn!(error = %e, "session marker not written");
        }
    }
    seen
}
