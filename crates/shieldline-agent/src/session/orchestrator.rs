//! Startup sequence.
//!
//! `Idle -> LoadingConfig -> ApplyingAdminOverrides -> [MigratingVersion]
//!  -> ActivatingRuleSets -> ResyncingPermissions -> ElevatingDefaults
//!  -> RegisteringInjectables -> Ready`
//!
//! Any error aborts the sequence and is returned to the caller (the crash
//! loop guard). A dormant-process wake only loads the config.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shieldline_core::error::Result;
use shieldline_core::protocol::StateDelta;
use shieldline_core::version;

use crate::config::{AgentSection, Flavor};
use crate::host::Hosts;
use crate::policy::PolicyReconciler;
use crate::rules::{RuleLifecycle, RuleRefresh};
use crate::scripting::InjectableRegistrar;
use crate::store::ConfigStore;

/// Admin feature name that, when disabled, forces developer mode off.
const DEVELOPER_FEATURE: &str = "develop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LoadingConfig,
    ApplyingAdminOverrides,
    MigratingVersion,
    ActivatingRuleSets,
    ResyncingPermissions,
    ElevatingDefaults,
    RegisteringInjectables,
    Ready,
}

pub struct SessionOrchestrator {
    agent: AgentSection,
    store: Arc<ConfigStore>,
    hosts: Hosts,
    rules: Arc<RuleLifecycle>,
    reconciler: Arc<PolicyReconciler>,
    injectables: Arc<InjectableRegistrar>,
    visited: Mutex<Vec<SessionState>>,
}

impl SessionOrchestrator {
    pub fn new(
        agent: AgentSection,
        store: Arc<ConfigStore>,
        hosts: Hosts,
        rules: Arc<RuleLifecycle>,
        reconciler: Arc<PolicyReconciler>,
        injectables: Arc<InjectableRegistrar>,
    ) -> Self {
        Self {
            agent,
            store,
            hosts,
            rules,
            reconciler,
            injectables,
            visited: Mutex::new(vec![SessionState::Idle]),
        }
    }

    fn visited_mut(&self) -> MutexGuard<'_, Vec<SessionState>> {
        self.visited.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, state: SessionState) {
        tracing::debug!(?state, "session state");
        self.visited_mut().push(state);
    }

    pub fn state(&self) -> SessionState {
        self.visited_mut().last().copied().unwrap_or(SessionState::Idle)
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn visited(&self) -> Vec<SessionState> {
        self.visited_mut().clone()
    }

    pub async fn start(&self, wakeup_run: bool) -> Result<()> {
        self.enter(SessionState::LoadingConfig);
        let cfg = self.store.load(wakeup_run).await?;
        if !wakeup_run {
            self.start_session(&cfg.last_version).await?;
        }
        // Host-side developer tooling is process state: it must be reapplied on
        // cold starts and wakes alike.
        let developer_mode = if wakeup_run {
            cfg.developer_mode
        } else {
            self.store.snapshot().await.developer_mode
        };
        if let Err(e) = self.hosts.runtime.set_developer_mode(developer_mode).await {
            tracing::warn!(error = %e, developer_mode, "developer mode not applied");
        }
        self.enter(SessionState::Ready);
        tracing::info!(version = %self.agent.version, wakeup_run, "session ready");
        Ok(())
    }

    async fn start_session(&self, last_version: &str) -> Result<()> {
        let current = self.agent.version.as_str();
        let version_changed = current != last_version;

        self.enter(SessionState::ApplyingAdminOverrides);
        self.apply_admin_overrides().await?;

        if version_changed {
            self.enter(SessionState::MigratingVersion);
            self.migrate(last_version, current).await?;
        }

        self.enter(SessionState::ActivatingRuleSets);
        self.activate_rule_sets(version_changed).await?;

        self.enter(SessionState::ResyncingPermissions);
        // Grants may have been removed while the agent was not running.
        self.reconciler.sync_with_grants().await?;

        self.enter(SessionState::ElevatingDefaults);
        self.reconciler.elevate_first_run().await?;

        // Registrations from a previous process are never trusted.
        self.enter(SessionState::RegisteringInjectables);
        self.injectables.refresh().await;

        self.enforce_admin_features().await?;
        Ok(())
    }

    async fn apply_admin_overrides(&self) -> Result<()> {
        let overrides = self.hosts.admin.rule_set_overrides().await?;
        if overrides.is_empty() {
            return Ok(());
        }
        self.store
            .update(|cfg| {
                for entry in &overrides {
                    if let Some(id) = entry.strip_prefix('-') {
                        cfg.enabled_rule_sets.remove(id);
                    } else {
                        let id = entry.strip_prefix('+').unwrap_or(entry);
                        if !id.is_empty() {
                            cfg.enabled_rule_sets.insert(id.to_string());
                        }
                    }
                }
            })
            .await?;
        tracing::info!(?overrides, "admin rule set overrides applied");
        Ok(())
    }

    async fn migrate(&self, from: &str, to: &str) -> Result<()> {
        tracing::info!(%from, %to, "version change");
        let fix_strict = self.agent.flavor == Flavor::Safari
            && !from.is_empty()
            && version::ordinal(from) <= version::ordinal(&self.agent.strict_block_fix_threshold);
        if fix_strict {
            let cleared = self
                .store
                .update(|cfg| std::mem::replace(&mut cfg.strict_block_mode, false))
                .await?;
            if cleared {
                tracing::warn!(%from, "strict block mode cleared for affected build");
            }
        }
        self.rules.patch_defaults_for_version(from, to).await?;
        self.store
            .update(|cfg| cfg.last_version = to.to_string())
            .await?;
        Ok(())
    }

    async fn activate_rule_sets(&self, version_changed: bool) -> Result<()> {
        let max = self.rules.max_enabled();
        let wanted: BTreeSet<String> = {
            let cfg = self.store.snapshot().await;
            if cfg.enabled_rule_sets.len() > max {
                tracing::warn!(count = cfg.enabled_rule_sets.len(), max, "enabled rule sets capped");
            }
            cfg.enabled_rule_sets.into_iter().take(max).collect()
        };

        let activation = self.rules.activate(&wanted).await?;
        let effective: BTreeSet<String> = activation.result.enabled.iter().cloned().collect();
        self.store
            .update(|cfg| cfg.enabled_rule_sets = effective)
            .await?;

        // Regex rules depend on the enabled rule sets.
        let refresh = if activation.engine_changed {
            self.rules.recompile_dynamic_rules().await?;
            RuleRefresh::Dynamic
        } else {
            self.rules.decide_rule_refresh(version_changed).await?
        };
        tracing::debug!(?refresh, "rules refreshed");

        if self.hosts.engine.supports_blocked_count() {
            let show = self.store.snapshot().await.show_blocked_count;
            if let Err(e) = self.hosts.engine.set_blocked_count_badge(show).await {
                tracing::warn!(error = %e, "blocked count badge not set");
            }
        }
        Ok(())
    }

    async fn enforce_admin_features(&self) -> Result<()> {
        let disabled = match self.hosts.admin.disabled_features().await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(error = %e, "admin disabled features unreadable");
                return Ok(());
            }
        };
        if !disabled.iter().any(|f| f == DEVELOPER_FEATURE) {
            return Ok(());
        }
        let was_on = self
            .store
            .update(|cfg| std::mem::replace(&mut cfg.developer_mode, false))
            .await?;
        if was_on {
            tracing::info!("developer mode disabled by admin");
            self.hosts.broadcaster.broadcast(StateDelta::DeveloperMode(false));
            if let Err(e) = self.rules.recompile_dynamic_rules().await {
                tracing::warn!(error = %e, "user rules not refreshed");
            }
        }
        Ok(())
    }
}
