//! Injectable computation and idempotent registration.
//!
//! The desired set is a pure function of enabled rule sets and levels.
//! Registration diffs it against what the host reports, so registering an
//! already-correct set touches nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use shieldline_core::error::Result;
use shieldline_core::protocol::RuleSetDetails;
use shieldline_core::FilteringLevel;

use crate::host::Hosts;
use crate::store::{ConfigStore, PolicyConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectableKind {
    Script,
    Style,
}

/// A content script or stylesheet registered to run in matching pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Injectable {
    pub id: String,
    pub kind: InjectableKind,
    pub files: Vec<String>,
    pub matches: Vec<String>,
    pub exclude_matches: Vec<String>,
}

fn host_pattern(hostname: &str) -> String {
    format!("*://*.{hostname}/*")
}

/// Match/exclude patterns for pages filtered at `min` or above.
fn patterns_at(cfg: &PolicyConfig, min: FilteringLevel) -> (Vec<String>, Vec<String>) {
    if cfg.default_level >= min {
        let excludes = cfg
            .per_host_level
            .iter()
            .filter(|(_, l)| **l < min)
            .map(|(h, _)| host_pattern(h))
            .collect();
        return (vec!["<all_urls>".to_string()], excludes);
    }
    let matches = cfg
        .per_host_level
        .iter()
        .filter(|(_, l)| **l >= min)
        .map(|(h, _)| host_pattern(h))
        .collect();
    (matches, Vec::new())
}

/// Desired injectables, sorted by id.
pub fn compute_injectables(cfg: &PolicyConfig, catalog: &[RuleSetDetails]) -> Vec<Injectable> {
    let specific = patterns_at(cfg, FilteringLevel::Optimal);
    let generic = patterns_at(cfg, FilteringLevel::Complete);

    let mut out = BTreeMap::new();
    for rs in catalog
        .iter()
        .filter(|rs| rs.has_cosmetics && cfg.enabled_rule_sets.contains(&rs.id))
    {
        let tiers = [
            ("specific", InjectableKind::Style, &specific),
            ("generic", InjectableKind::Script, &generic),
        ];
        for (tier, kind, (matches, excludes)) in tiers {
            if matches.is_empty() {
                continue;
            }
            let id = format!("{}.{tier}", rs.id);
            let ext = match kind {
                InjectableKind::Style => "css",
                InjectableKind::Script => "js",
            };
            out.insert(
                id.clone(),
                Injectable {
                    id,
                    kind,
                    files: vec![format!("/rulesets/scripting/{tier}/{}.{ext}", rs.id)],
                    matches: matches.clone(),
                    exclude_matches: excludes.clone(),
                },
            );
        }
    }
    out.into_values().collect()
}

/// Keeps the host's registered injectables equal to the computed set.
pub struct InjectableRegistrar {
    hosts: Hosts,
    store: Arc<ConfigStore>,
}

impl InjectableRegistrar {
    pub fn new(hosts: Hosts, store: Arc<ConfigStore>) -> Self {
        Self { hosts, store }
    }

    /// Bring registrations in line with current policy. Returns whether the
    /// host was asked to change anything.
    pub async fn register(&self) -> Result<bool> {
        let cfg = self.store.snapshot().await;
        let catalog = self.hosts.engine.catalog().await?;
        let desired = compute_injectables(&cfg, &catalog);
        let current = self.hosts.scripting.registered().await?;

        let stale: Vec<String> = current
            .iter()
            .filter(|c| !desired.contains(c))
            .map(|c| c.id.clone())
            .collect();
        let missing: Vec<Injectable> = desired
            .iter()
            .filter(|d| !current.contains(d))
            .cloned()
            .collect();

        if stale.is_empty() && missing.is_empty() {
            tracing::debug!(count = desired.len(), "injectables up to date");
            return Ok(false);
        }
        if !stale.is_empty() {
            self.hosts.scripting.unregister(&stale).await?;
        }
        if !missing.is_empty() {
            self.hosts.scripting.register(&missing).await?;
        }
        tracing::info!(removed = stale.len(), added = missing.len(), "injectables registered");
        Ok(true)
    }

    /// Best-effort [`register`](Self::register): failures are logged.
    pub async fn refresh(&self) -> bool {
        match self.register().await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(error = %e, "injectable registration failed");
                false
            }
        }
    }
}
