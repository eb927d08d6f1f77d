//! Bounded self-restart after a failed boot.
//!
//! Transition table for the persisted flag:
//!
//! | flag            | boot ok | cold boot fails              | wake fails |
//! |-----------------|---------|------------------------------|------------|
//! | Clean           | Clean   | AwaitingRetry + restart      | unchanged  |
//! | AwaitingRetry   | Clean   | Clean, give up               | unchanged  |
//! | RetryExhausted  | Clean   | Clean, give up               | unchanged  |

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use shieldline_core::error::{Result, ShieldError};

use crate::host::RuntimeHost;
use crate::store::KeyValueStore;

/// Storage key of the flag, independent of the policy blob.
pub const CRASH_GUARD_KEY: &str = "crashGuard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashGuardFlag {
    /// No failure streak in progress (key absent).
    Clean,
    /// One failure seen, one restart issued (stored `false`).
    AwaitingRetry,
    /// Any other stored value; treated as a spent retry.
    RetryExhausted,
}

impl CrashGuardFlag {
    fn from_stored(v: Option<&Value>) -> Self {
        match v {
            None | Some(Value::Null) => CrashGuardFlag::Clean,
            Some(Value::Bool(false)) => CrashGuardFlag::AwaitingRetry,
            Some(_) => CrashGuardFlag::RetryExhausted,
        }
    }
}

/// How a supervised boot ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Ready,
    /// Boot failed; one process restart was requested.
    RestartRequested(ShieldError),
    /// Boot failed and no restart will be attempted.
    Failed(ShieldError),
}

impl BootOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BootOutcome::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BootOutcome::Ready => "ready",
            BootOutcome::RestartRequested(_) => "restart",
            BootOutcome::Failed(_) => "failed",
        }
    }
}

pub struct CrashLoopGuard {
    kv: Arc<dyn KeyValueStore>,
    runtime: Arc<dyn RuntimeHost>,
    // Serializes read-decide-write on the flag.
    lock: Mutex<()>,
}

impl CrashLoopGuard {
    pub fn new(kv: Arc<dyn KeyValueStore>, runtime: Arc<dyn RuntimeHost>) -> Self {
        Self {
            kv,
            runtime,
            lock: Mutex::new(()),
        }
    }

    pub async fn flag(&self) -> Result<CrashGuardFlag> {
        let v = self.kv.read(CRASH_GUARD_KEY).await?;
        Ok(CrashGuardFlag::from_stored(v.as_ref()))
    }

    /// Run `boot` and convert a failure into at most one restart per
    /// failure streak.
    pub async fn supervise<F>(&self, wakeup_run: bool, boot: F) -> BootOutcome
    where
        F: Future<Output = Result<()>>,
    {
        let err = match boot.await {
            Ok(()) => {
                if let Err(e) = self.kv.remove(CRASH_GUARD_KEY).await {
                    tracing::warn!(error = %e, "crash guard reset failed");
                }
                return BootOutcome::Ready;
            }
            Err(e) => e,
        };
        tracing::error!(error = %err, wakeup_run, "boot failed");

        if wakeup_run {
            return BootOutcome::Failed(err);
        }

        let _held = self.lock.lock().await;
        let flag = match self.flag().await {
            Ok(flag) => flag,
            Err(e) => {
                tracing::error!(error = %e, "crash guard unreadable, not restarting");
                return BootOutcome::Failed(err);
            }
        };

        match flag {
            CrashGuardFlag::Clean => {
                if let Err(e) = self.kv.write(CRASH_GUARD_KEY, Value::Bool(false)).await {
                    tracing::error!(error = %e, "crash guard not persisted, not restarting");
                    return BootOutcome::Failed(err);
                }
                tracing::warn!("requesting one restart after boot failure");
                if let Err(e) = self.runtime.reload().await {
                    tracing::error!(error = %e, "restart request failed");
                }
                BootOutcome::RestartRequested(err)
            }
            CrashGuardFlag::AwaitingRetry | CrashGuardFlag::RetryExhausted => {
                if let Err(e) = self.kv.remove(CRASH_GUARD_KEY).await {
                    tracing::warn!(error = %e, "crash guard reset failed");
                }
                tracing::error!(?flag, "boot failed again, giving up");
                BootOutcome::Failed(err)
            }
        }
    }
}
