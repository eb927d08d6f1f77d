use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::FilteringLevel;

use super::KeyValueStore;

/// Storage key of the policy blob.
pub const POLICY_KEY: &str = "policyConfig";
/// Newest blob layout this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Persisted policy aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyConfig {
    pub schema_version: u32,
    /// Build version that last completed a session start.
    pub last_version: String,
    pub enabled_rule_sets: BTreeSet<String>,
    pub default_level: FilteringLevel,
    pub per_host_level: BTreeMap<String, FilteringLevel>,
    pub strict_block_mode: bool,
    pub strict_block_exclusions: BTreeSet<String>,
    pub auto_reload: bool,
    pub show_blocked_count: bool,
    pub developer_mode: bool,
    pub first_run: bool,
    /// Process was resumed rather than cold-booted. Never persisted.
    #[serde(skip)]
    pub wakeup_run: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_version: String::new(),
            enabled_rule_sets: BTreeSet::new(),
            default_level: FilteringLevel::Basic,
            per_host_level: BTreeMap::new(),
            strict_block_mode: true,
            strict_block_exclusions: BTreeSet::new(),
            auto_reload: true,
            show_blocked_count: true,
            developer_mode: false,
            first_run: true,
            wakeup_run: false,
        }
    }
}

/// Single owner of the persisted [`PolicyConfig`].
///
/// Every mutation goes through [`ConfigStore::update`], which holds the
/// store lock across the persist call: concurrent handlers queue behind each
/// other instead of interleaving read-modify-write cycles.
pub struct ConfigStore {
    kv: Arc<dyn KeyValueStore>,
    cached: Mutex<PolicyConfig>,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            cached: Mutex::new(PolicyConfig::default()),
        }
    }

    /// Load the blob from storage into the cache. A missing blob yields the
    /// first-run defaults.
    pub async fn load(&self, wakeup_run: bool) -> Result<PolicyConfig> {
        let mut loaded = match self.kv.read(POLICY_KEY).await? {
            None => {
                tracing::info!("no stored policy, starting from defaults");
                PolicyConfig::default()
            }
            Some(v) => {
                let cfg: PolicyConfig = serde_json::from_value(v)
                    .map_err(|e| ShieldError::Storage(format!("policy blob unreadable: {e}")))?;
                if cfg.schema_version > SCHEMA_VERSION {
                    return Err(ShieldError::UnsupportedVersion);
                }
                cfg
            }
        };
        loaded.schema_version = SCHEMA_VERSION;
        loaded.wakeup_run = wakeup_run;

        let mut guard = self.cached.lock().await;
        *guard = loaded.clone();
        Ok(loaded)
    }

    pub async fn snapshot(&self) -> PolicyConfig {
        self.cached.lock().await.clone()
    }

    /// Apply `f` to a copy of the config; persist and commit only if the copy
    /// changed. If the write fails neither storage nor cache is modified.
    pub async fn update<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut PolicyConfig) -> R + Send,
        R: Send,
    {
        let mut txn = self.begin().await;
        let out = f(txn.config_mut());
        txn.commit().await?;
        Ok(out)
    }

    /// Open a read-modify-write transaction. The store stays locked until the
    /// transaction is committed or dropped, so host queries made while it is
    /// open (e.g. the current grant set) cannot go stale before the write.
    pub async fn begin(&self) -> ConfigTxn<'_> {
        let guard = self.cached.lock().await;
        let next = guard.clone();
        ConfigTxn {
            kv: &self.kv,
            guard,
            next,
        }
    }

    pub fn kv(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }
}

/// Pending change to the policy blob; dropped without commit it is discarded.
pub struct ConfigTxn<'a> {
    kv: &'a Arc<dyn KeyValueStore>,
    guard: MutexGuard<'a, PolicyConfig>,
    next: PolicyConfig,
}

impl ConfigTxn<'_> {
    pub fn config(&self) -> &PolicyConfig {
        &self.next
    }

    pub fn config_mut(&mut self) -> &mut PolicyConfig {
        &mut self.next
    }

    /// Persist if anything changed. Returns whether a write happened.
    pub async fn commit(mut self) -> Result<bool> {
        if self.next == *self.guard {
            return Ok(false);
        }
        let blob = serde_json::to_value(&self.next)
            .map_err(|e| ShieldError::Internal(format!("policy encode failed: {e}")))?;
        self.kv.write(POLICY_KEY, blob).await?;
        *self.guard = std::mem::take(&mut self.next);
        Ok(true)
    }
}
