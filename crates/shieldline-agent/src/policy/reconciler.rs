use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::grants::GrantSet;
use shieldline_core::protocol::LevelDetails;
use shieldline_core::FilteringLevel;

use super::levels;
use super::pending::PendingSlot;
use crate::host::Hosts;
use crate::rules::RuleLifecycle;
use crate::scripting::InjectableRegistrar;
use crate::store::ConfigStore;

/// What a grant-added event did.
#[derive(Debug)]
pub enum GrantOutcome {
    /// No upgrade was pending; levels were re-checked against grants.
    Resynced { changed: bool },
    /// The pending upgrade was applied.
    Upgraded {
        hostname: String,
        level: FilteringLevel,
        /// Delayed reload of the originating tab, when auto-reload is on.
        reload: Option<JoinHandle<()>>,
    },
    /// A pending upgrade was consumed but the grant does not concern it.
    NotApplicable,
    /// A pending upgrade was consumed but the site's level moved since.
    Stale,
}

impl GrantOutcome {
    /// Wait for the scheduled tab reload, if any. Returns `false` when the
    /// reload task panicked or was cancelled.
    pub async fn settle(self) -> bool {
        let GrantOutcome::Upgraded { reload: Some(reload), .. } = self else {
            return true;
        };
        match reload.await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "tab reload task failed");
                false
            }
        }
    }
}

/// Keeps filtering levels consistent with the user's permission grants.
pub struct PolicyReconciler {
    store: Arc<ConfigStore>,
    hosts: Hosts,
    rules: Arc<RuleLifecycle>,
    injectables: Arc<InjectableRegistrar>,
    pending: PendingSlot,
    reload_delay: Duration,
}

pub(crate) fn normalize_hostname(hostname: &str) -> Result<String> {
    let h = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
    if h.is_empty() || h.contains('/') || h.contains(char::is_whitespace) {
        return Err(ShieldError::BadRequest(format!("invalid hostname: {hostname:?}")));
    }
    Ok(h)
}

impl PolicyReconciler {
    pub fn new(
        store: Arc<ConfigStore>,
        hosts: Hosts,
        rules: Arc<RuleLifecycle>,
        injectables: Arc<InjectableRegistrar>,
        reload_delay: Duration,
    ) -> Self {
        Self {
            store,
            hosts,
            rules,
            injectables,
            pending: PendingSlot::new(),
            reload_delay,
        }
    }

    pub fn pending(&self) -> &PendingSlot {
        &self.pending
    }

    pub async fn grants(&self) -> Result<GrantSet> {
        let origins = self.hosts.permissions.granted_origins().await?;
        Ok(GrantSet::from_origins(&origins))
    }

    pub async fn has_broad_grant(&self) -> Result<bool> {
        Ok(self.grants().await?.is_broad())
    }

    /// Mutate the config against the live grant set. Grants are queried with
    /// the store locked, so a concurrent revoke resync cannot be overtaken
    /// by a write based on an older grant set.
    async fn update_with_grants<R>(&self, f: impl FnOnce(&mut crate::store::PolicyConfig, &GrantSet) -> R) -> Result<R> {
        let mut txn = self.store.begin().await;
        let grants = self.grants().await?;
        let out = f(txn.config_mut(), &grants);
        txn.commit().await?;
        Ok(out)
    }

    /// Downgrade levels the grants no longer allow. Returns whether anything
    /// changed.
    pub async fn sync_with_grants(&self) -> Result<bool> {
        self.update_with_grants(levels::sync_with_grants).await
    }

    pub async fn on_grant_revoked(&self) -> Result<bool> {
        let changed = self.sync_with_grants().await?;
        if changed {
            self.injectables.refresh().await;
        }
        Ok(changed)
    }

    pub async fn on_grant_added(&self, origins: &[String]) -> Result<GrantOutcome> {
        // Consume before any await: a second event must not see this token.
        let Some(token) = self.pending.take() else {
            let changed = self.sync_with_grants().await?;
            if changed {
                let (session, _) = futures_util::join!(
                    self.rules.refresh_session_rules(),
                    self.injectables.refresh()
                );
                if let Err(e) = session {
                    tracing::warn!(error = %e, "session rule refresh failed");
                }
            }
            return Ok(GrantOutcome::Resynced { changed });
        };

        if token.requested_level == token.issued_at_level {
            tracing::debug!(hostname = %token.hostname, level = %token.requested_level, "pending upgrade is a no-op");
            return Ok(GrantOutcome::NotApplicable);
        }
        let cfg = self.store.snapshot().await;
        if cfg.default_level >= FilteringLevel::Optimal {
            tracing::debug!(hostname = %token.hostname, "grant immaterial, default level already broad");
            return Ok(GrantOutcome::NotApplicable);
        }
        if !GrantSet::from_origins(origins).covers(&token.hostname) {
            tracing::debug!(hostname = %token.hostname, "grant does not cover pending upgrade");
            return Ok(GrantOutcome::NotApplicable);
        }

        let applied = self
            .update_with_grants(|cfg, grants| {
                if levels::level_for(cfg, &token.hostname) != token.issued_at_level {
                    return None;
                }
                Some(levels::set_level(cfg, &token.hostname, token.requested_level, grants))
            })
            .await?;
        let level = match applied {
            None => {
                tracing::debug!(hostname = %token.hostname, generation = token.generation, "pending upgrade stale");
                return Ok(GrantOutcome::Stale);
            }
            Some(level) if level != token.requested_level => {
                tracing::debug!(hostname = %token.hostname, %level, "pending upgrade clamped");
                return Ok(GrantOutcome::NotApplicable);
            }
            Some(level) => level,
        };
        tracing::info!(hostname = %token.hostname, %level, "pending upgrade applied");
        self.injectables.refresh().await;

        let reload = if self.store.snapshot().await.auto_reload {
            let tabs = Arc::clone(&self.hosts.tabs);
            let delay = self.reload_delay;
            let (tab_id, url) = (token.origin_tab_id, token.origin_url.clone());
            Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = tabs.navigate(tab_id, &url).await {
                    tracing::debug!(tab_id, error = %e, "tab reload skipped");
                }
            }))
        } else {
            None
        };

        Ok(GrantOutcome::Upgraded {
            hostname: token.hostname,
            level,
            reload,
        })
    }

    /// Remember that `hostname` should move to `level` once a grant for it
    /// arrives. Requesting the permission is the caller's job.
    pub async fn request_upgrade(&self, hostname: &str, tab_id: i64, url: &str, level: FilteringLevel) -> Result<u64> {
        let hostname = normalize_hostname(hostname)?;
        let current = levels::level_for(&self.store.snapshot().await, &hostname);
        Ok(self
            .pending
            .issue(hostname, tab_id, url.to_string(), level, current))
    }

    pub async fn get_level(&self, hostname: &str) -> Result<FilteringLevel> {
        let hostname = normalize_hostname(hostname)?;
        Ok(levels::level_for(&self.store.snapshot().await, &hostname))
    }

    /// Returns `(before, after)`.
    pub async fn set_level(&self, hostname: &str, level: FilteringLevel) -> Result<(FilteringLevel, FilteringLevel)> {
        let hostname = normalize_hostname(hostname)?;
        self.update_with_grants(|cfg, grants| {
            let before = levels::level_for(cfg, &hostname);
            if before == level {
                return (before, before);
            }
            (before, levels::set_level(cfg, &hostname, level, grants))
        })
        .await
    }

    pub async fn get_default_level(&self) -> FilteringLevel {
        self.store.snapshot().await.default_level
    }

    /// Returns `(before, after)`.
    pub async fn set_default_level(&self, level: FilteringLevel) -> Result<(FilteringLevel, FilteringLevel)> {
        self.update_with_grants(|cfg, grants| {
            let before = cfg.default_level;
            (before, levels::set_default_level(cfg, level, grants))
        })
        .await
    }

    /// Raise the default level on first run; clears `first_run` only when the
    /// raise took effect. Returns whether the default level changed.
    pub async fn elevate_first_run(&self) -> Result<bool> {
        self.update_with_grants(|cfg, grants| {
            if !cfg.first_run {
                return false;
            }
            let target = if grants.is_broad() {
                FilteringLevel::Complete
            } else {
                FilteringLevel::max_ungranted()
            };
            let before = cfg.default_level;
            if before >= target {
                cfg.first_run = false;
                return false;
            }
            let after = levels::set_default_level(cfg, target, grants);
            if after == target {
                cfg.first_run = false;
                tracing::info!(level = %after, "first run default level set");
            } else {
                cfg.default_level = before;
            }
            before != cfg.default_level
        })
        .await
    }

    pub async fn level_details(&self) -> LevelDetails {
        levels::details(&self.store.snapshot().await)
    }

    pub async fn set_level_details(&self, details: &LevelDetails) -> Result<LevelDetails> {
        self.update_with_grants(|cfg, grants| {
            levels::replace_details(cfg, details, grants);
            levels::details(cfg)
        })
        .await
    }
}
