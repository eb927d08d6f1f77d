//! Level lookups and mutations on a [`PolicyConfig`].
//!
//! Every mutation clamps against the grant set, so `per_host_level` never
//! holds a level at or above `Optimal` for an uncovered hostname.

use shieldline_core::grants::{parent_domains, GrantSet};
use shieldline_core::protocol::LevelDetails;
use shieldline_core::FilteringLevel;

use crate::store::PolicyConfig;

/// Level of `hostname`: its own entry, else the nearest listed parent
/// domain, else the default.
pub fn level_for(cfg: &PolicyConfig, hostname: &str) -> FilteringLevel {
    parent_domains(hostname)
        .find_map(|h| cfg.per_host_level.get(h).copied())
        .unwrap_or(cfg.default_level)
}

fn inherited_level(cfg: &PolicyConfig, hostname: &str) -> FilteringLevel {
    parent_domains(hostname)
        .skip(1)
        .find_map(|h| cfg.per_host_level.get(h).copied())
        .unwrap_or(cfg.default_level)
}

/// Set the level of one hostname; returns the level now in effect.
///
/// An entry equal to what the hostname would inherit anyway is dropped.
pub fn set_level(
    cfg: &mut PolicyConfig,
    hostname: &str,
    level: FilteringLevel,
    grants: &GrantSet,
) -> FilteringLevel {
    let level = level.clamp_to_grant(grants.covers(hostname));
    if inherited_level(cfg, hostname) == level {
        cfg.per_host_level.remove(hostname);
    } else {
        cfg.per_host_level.insert(hostname.to_string(), level);
    }
    level_for(cfg, hostname)
}

/// Set the default level; returns the level now in effect.
pub fn set_default_level(cfg: &mut PolicyConfig, level: FilteringLevel, grants: &GrantSet) -> FilteringLevel {
    cfg.default_level = level.clamp_to_grant(grants.is_broad());
    cfg.default_level
}

pub fn details(cfg: &PolicyConfig) -> LevelDetails {
    LevelDetails {
        default_level: cfg.default_level,
        per_host: cfg.per_host_level.clone(),
    }
}

/// Replace default and per-host levels in bulk, clamped to grants.
pub fn replace_details(cfg: &mut PolicyConfig, details: &LevelDetails, grants: &GrantSet) {
    cfg.default_level = details.default_level;
    cfg.per_host_level = details
        .per_host
        .iter()
        .filter(|(h, _)| !h.is_empty())
        .map(|(h, l)| (h.to_ascii_lowercase(), *l))
        .collect();
    sync_with_grants(cfg, grants);
    prune_redundant(cfg);
}

/// Downgrade every level the grants no longer allow to `Basic`.
/// Returns whether anything changed.
pub fn sync_with_grants(cfg: &mut PolicyConfig, grants: &GrantSet) -> bool {
    let mut changed = false;
    if cfg.default_level.requires_grant() && !grants.is_broad() {
        tracing::info!(from = %cfg.default_level, "default level downgraded, broad grant missing");
        cfg.default_level = FilteringLevel::max_ungranted();
        changed = true;
    }
    for (hostname, level) in cfg.per_host_level.iter_mut() {
        if level.requires_grant() && !grants.covers(hostname) {
            tracing::info!(%hostname, from = %level, "site level downgraded, grant missing");
            *level = FilteringLevel::max_ungranted();
            changed = true;
        }
    }
    if changed {
        prune_redundant(cfg);
    }
    changed
}

fn prune_redundant(cfg: &mut PolicyConfig) {
    let redundant: Vec<String> = cfg
        .per_host_level
        .iter()
        .filter(|(h, l)| inherited_level(cfg, h) == **l)
        .map(|(h, _)| h.clone())
        .collect();
    for h in redundant {
        cfg.per_host_level.remove(&h);
    }
}
