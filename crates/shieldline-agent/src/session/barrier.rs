use tokio::sync::watch;

/// Final boot state observed by event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootStatus {
    Ready,
    Failed,
}

/// Single-use gate every inbound event waits on before running.
///
/// Resolves once; later `resolve` calls are ignored and later waiters return
/// immediately with the cached status.
pub struct BootBarrier {
    tx: watch::Sender<Option<BootStatus>>,
}

impl Default for BootBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl BootBarrier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Returns `false` if the barrier was already resolved.
    pub fn resolve(&self, status: BootStatus) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(status);
            true
        })
    }

    pub fn status(&self) -> Option<BootStatus> {
        *self.tx.borrow()
    }

    pub async fn wait(&self) -> BootStatus {
        let mut rx = self.tx.subscribe();
        loop {
            let current = *rx.borrow_and_update();
            if let Some(status) = current {
                return status;
            }
            if rx.changed().await.is_err() {
                return BootStatus::Failed;
            }
        }
    }
}
