use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::protocol::EnabledRuleSets;

use crate::host::{Hosts, SessionRuleInput};
use crate::store::ConfigStore;

/// Storage key remembering which rule sets were default in the last build.
pub const DEFAULT_RULE_SETS_KEY: &str = "defaultRuleSetIds";

/// Which rule refresh a boot performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleRefresh {
    /// Full recompilation of custom/user filters into dynamic rules.
    Dynamic,
    /// Regeneration of runtime-only session rules.
    Session,
}

/// Result of pushing a rule-set selection to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub result: EnabledRuleSets,
    /// The engine's enabled set actually changed.
    pub engine_changed: bool,
}

/// Enables/disables bundled rule sets under the engine's cardinality limit.
pub struct RuleLifecycle {
    store: Arc<ConfigStore>,
    hosts: Hosts,
    /// Strict-block bypasses that last until the process exits.
    temporary_exclusions: Mutex<BTreeSet<String>>,
}

impl RuleLifecycle {
    pub fn new(store: Arc<ConfigStore>, hosts: Hosts) -> Self {
        Self {
            store,
            hosts,
            temporary_exclusions: Mutex::new(BTreeSet::new()),
        }
    }

    fn exclusions(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.temporary_exclusions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_enabled(&self) -> usize {
        self.hosts.engine.max_enabled_rule_sets()
    }

    /// Commit a new enabled set.
    ///
    /// Rejected with `LimitExceeded` (nothing changed) when more distinct ids
    /// than the engine allows are requested. Ids unknown to the engine are
    /// reported back in `rejected`; the persisted set is the effective one.
    pub async fn set_enabled_rule_sets(&self, ids: &[String]) -> Result<EnabledRuleSets> {
        let requested: BTreeSet<String> = ids.iter().cloned().collect();
        let max = self.max_enabled();
        if requested.len() > max {
            return Err(ShieldError::LimitExceeded {
                requested: requested.len(),
                max,
            });
        }

        let activation = self.activate(&requested).await?;
        let effective: BTreeSet<String> = activation.result.enabled.iter().cloned().collect();
        self.store
            .update(|cfg| cfg.enabled_rule_sets = effective)
            .await?;

        if activation.engine_changed {
            self.recompile_dynamic_rules().await?;
        }
        if !activation.result.rejected.is_empty() {
            tracing::warn!(rejected = ?activation.result.rejected, "unknown rule sets ignored");
        }
        Ok(activation.result)
    }

    /// Make the engine's enabled set equal `ids` (minus unknown ids) and
    /// report what the engine ended up with.
    pub async fn activate(&self, ids: &BTreeSet<String>) -> Result<Activation> {
        let known: BTreeSet<String> = self
            .hosts
            .engine
            .catalog()
            .await?
            .into_iter()
            .map(|rs| rs.id)
            .collect();
        let rejected: Vec<String> = ids.difference(&known).cloned().collect();
        let wanted: BTreeSet<String> = ids.intersection(&known).cloned().collect();

        let current: BTreeSet<String> = self
            .hosts
            .engine
            .enabled_rule_sets()
            .await?
            .into_iter()
            .collect();
        let enable: Vec<String> = wanted.difference(&current).cloned().collect();
        let disable: Vec<String> = current.difference(&wanted).cloned().collect();

        let engine_changed = !(enable.is_empty() && disable.is_empty());
        if engine_changed {
            tracing::info!(?enable, ?disable, "updating enabled rule sets");
            self.hosts
                .engine
                .update_enabled_rule_sets(&enable, &disable)
                .await?;
        }

        let mut enabled = self.hosts.engine.enabled_rule_sets().await?;
        enabled.sort();
        Ok(Activation {
            result: EnabledRuleSets { enabled, rejected },
            engine_changed,
        })
    }

    /// Recompile dynamic rules after a version change, otherwise only
    /// regenerate session rules.
    pub async fn decide_rule_refresh(&self, version_changed: bool) -> Result<RuleRefresh> {
        if version_changed {
            self.recompile_dynamic_rules().await?;
            Ok(RuleRefresh::Dynamic)
        } else {
            self.refresh_session_rules().await?;
            Ok(RuleRefresh::Session)
        }
    }

    pub async fn recompile_dynamic_rules(&self) -> Result<()> {
        let cfg = self.store.snapshot().await;
        self.hosts.engine.recompile_dynamic_rules(&cfg).await
    }

    pub async fn refresh_session_rules(&self) -> Result<()> {
        let cfg = self.store.snapshot().await;
        let mut strict_block_exclusions = cfg.strict_block_exclusions.clone();
        strict_block_exclusions.extend(self.exclusions().iter().cloned());
        let input = SessionRuleInput {
            strict_block_mode: cfg.strict_block_mode,
            strict_block_exclusions,
        };
        self.hosts.engine.refresh_session_rules(&input).await
    }

    /// Let `hostname` bypass strict blocking, for this process lifetime or
    /// permanently.
    pub async fn exclude_from_strict(&self, hostname: &str, permanent: bool) -> Result<()> {
        if permanent {
            self.store
                .update(|cfg| {
                    cfg.strict_block_exclusions.insert(hostname.to_string());
                })
                .await?;
        } else {
            self.exclusions().insert(hostname.to_string());
        }
        self.refresh_session_rules().await
    }

    /// Carry default rule-set membership across a version upgrade.
    ///
    /// Rule sets that became default are enabled, rule sets that stopped
    /// being default or left the catalog are disabled. Existing selections
    /// keep priority when the engine limit is hit. Returns whether the
    /// enabled set changed; the result is persisted before returning.
    pub async fn patch_defaults_for_version(&self, old_version: &str, new_version: &str) -> Result<bool> {
        let catalog = self.hosts.engine.catalog().await?;
        let known: BTreeSet<String> = catalog.iter().map(|rs| rs.id.clone()).collect();
        let new_defaults: BTreeSet<String> = catalog
            .iter()
            .filter(|rs| rs.enabled_by_default)
            .map(|rs| rs.id.clone())
            .collect();

        let kv = self.store.kv();
        let old_defaults: BTreeSet<String> = match kv.read(DEFAULT_RULE_SETS_KEY).await? {
            Some(v) => serde_json::from_value(v).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "stored default rule sets unreadable");
                BTreeSet::new()
            }),
            None => BTreeSet::new(),
        };
        let to_add: Vec<String> = new_defaults.difference(&old_defaults).cloned().collect();
        let to_remove: BTreeSet<String> = old_defaults.difference(&new_defaults).cloned().collect();

        let max = self.max_enabled();
        let patched = self
            .store
            .update(|cfg| {
                let mut next: Vec<String> = cfg
                    .enabled_rule_sets
                    .iter()
                    .filter(|id| known.contains(*id) && !to_remove.contains(*id))
                    .cloned()
                    .collect();
                next.truncate(max);
                for id in to_add {
                    if next.len() >= max {
                        tracing::warn!(rule_set = %id, max, "default rule set skipped, engine limit reached");
                        continue;
                    }
                    if !next.contains(&id) {
                        next.push(id);
                    }
                }
                let next: BTreeSet<String> = next.into_iter().collect();
                if next == cfg.enabled_rule_sets {
                    return false;
                }
                tracing::info!(
                    from = %old_version,
                    to = %new_version,
                    before = ?cfg.enabled_rule_sets,
                    after = ?next,
                    "patched default rule sets"
                );
                cfg.enabled_rule_sets = next;
                true
            })
            .await?;

        if old_defaults != new_defaults {
            let blob = serde_json::to_value(&new_defaults)
                .map_err(|e| ShieldError::Internal(format!("encode default rule sets: {e}")))?;
            kv.write(DEFAULT_RULE_SETS_KEY, blob).await?;
        }
        Ok(patched)
    }
}
