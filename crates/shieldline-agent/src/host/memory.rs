//! In-memory host used by the binary and by tests.
//!
//! Every call is recorded so callers can assert on what the agent asked the
//! host to do.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{json, Value};

use shieldline_core::error::{Result, ShieldError};
use shieldline_core::protocol::{RuleSetDetails, StateDelta};

use super::{
    AdminPolicy, Broadcaster, FrameTarget, Hosts, PermissionHost, RuleEngine, RuntimeHost,
    ScriptingHost, SessionRuleInput, TabsHost,
};
use crate::scripting::Injectable;
use crate::store::PolicyConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct MemoryHost {
    // permissions
    origins: Mutex<Vec<String>>,

    // rule engine
    catalog: Mutex<Vec<RuleSetDetails>>,
    max_enabled: usize,
    engine_enabled: Mutex<BTreeSet<String>>,
    engine_down: AtomicBool,
    dynamic_recompiles: AtomicU64,
    session_refreshes: Mutex<Vec<SessionRuleInput>>,
    dynamic_rules: Mutex<Vec<Value>>,
    badge: Mutex<Option<bool>>,

    // scripting
    registered: Mutex<BTreeMap<String, Injectable>>,
    register_calls: AtomicU64,
    css_ops: Mutex<Vec<(String, FrameTarget, String)>>,
    scripts: Mutex<Vec<(FrameTarget, Vec<String>)>>,

    // tabs
    open_tabs: Mutex<BTreeSet<i64>>,
    navigations: Mutex<Vec<(i64, String)>>,
    icon_toggles: Mutex<Vec<i64>>,
    opened_urls: Mutex<Vec<String>>,

    // runtime
    reloads: AtomicU64,
    developer_mode_calls: Mutex<Vec<bool>>,

    // admin
    admin_overrides: Mutex<Vec<String>>,
    disabled_features: Mutex<Vec<String>>,

    broadcasts: Mutex<Vec<StateDelta>>,
}

impl MemoryHost {
    pub fn new(catalog: Vec<RuleSetDetails>, max_enabled: usize) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            max_enabled,
            ..Default::default()
        }
    }

    /// Small catalog resembling a stock install.
    pub fn demo(max_enabled: usize) -> Self {
        let rs = |id: &str, name: &str, default: bool, cosmetics: bool| RuleSetDetails {
            id: id.into(),
            name: name.into(),
            enabled_by_default: default,
            has_cosmetics: cosmetics,
        };
        Self::new(
            vec![
                rs("default", "Ads, trackers, miners", true, true),
                rs("badware", "Badware risks", true, false),
                rs("annoyances-cookies", "Cookie notices", false, true),
                rs("annoyances-overlays", "Overlay notices", false, true),
                rs("privacy-urls", "Tracking URL parameters", false, false),
            ],
            max_enabled,
        )
    }

    /// Bundle this host as every collaborator.
    pub fn hosts(self: &Arc<Self>) -> Hosts {
        Hosts {
            permissions: self.clone(),
            engine: self.clone(),
            scripting: self.clone(),
            tabs: self.clone(),
            runtime: self.clone(),
            admin: self.clone(),
            broadcaster: self.clone(),
        }
    }

    pub fn set_origins<S: Into<String>>(&self, origins: impl IntoIterator<Item = S>) {
        *lock(&self.origins) = origins.into_iter().map(Into::into).collect();
    }

    pub fn set_catalog(&self, catalog: Vec<RuleSetDetails>) {
        *lock(&self.catalog) = catalog;
    }

    /// Make every rule-engine call fail.
    pub fn set_engine_down(&self, down: bool) {
        self.engine_down.store(down, Ordering::Relaxed);
    }

    pub fn engine_enabled(&self) -> BTreeSet<String> {
        lock(&self.engine_enabled).clone()
    }

    pub fn dynamic_recompiles(&self) -> u64 {
        self.dynamic_recompiles.load(Ordering::Relaxed)
    }

    pub fn session_refreshes(&self) -> Vec<SessionRuleInput> {
        lock(&self.session_refreshes).clone()
    }

    /// Rules reported by `effective_dynamic_rules`.
    pub fn set_dynamic_rules(&self, rules: Vec<Value>) {
        *lock(&self.dynamic_rules) = rules;
    }

    pub fn badge(&self) -> Option<bool> {
        *lock(&self.badge)
    }

    pub fn registered_injectables(&self) -> Vec<Injectable> {
        lock(&self.registered).values().cloned().collect()
    }

    /// Number of `register`/`unregister` calls that reached the host.
    pub fn register_calls(&self) -> u64 {
        self.register_calls.load(Ordering::Relaxed)
    }

    pub fn css_ops(&self) -> Vec<(String, FrameTarget, String)> {
        lock(&self.css_ops).clone()
    }

    pub fn scripts(&self) -> Vec<(FrameTarget, Vec<String>)> {
        lock(&self.scripts).clone()
    }

    pub fn open_tab(&self, tab_id: i64) {
        lock(&self.open_tabs).insert(tab_id);
    }

    pub fn close_tab(&self, tab_id: i64) {
        lock(&self.open_tabs).remove(&tab_id);
    }

    pub fn navigations(&self) -> Vec<(i64, String)> {
        lock(&self.navigations).clone()
    }

    pub fn icon_toggles(&self) -> Vec<i64> {
        lock(&self.icon_toggles).clone()
    }

    pub fn opened_urls(&self) -> Vec<String> {
        lock(&self.opened_urls).clone()
    }

    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    pub fn developer_mode_calls(&self) -> Vec<bool> {
        lock(&self.developer_mode_calls).clone()
    }

    pub fn set_admin_overrides<S: Into<String>>(&self, entries: impl IntoIterator<Item = S>) {
        *lock(&self.admin_overrides) = entries.into_iter().map(Into::into).collect();
    }

    pub fn set_disabled_features<S: Into<String>>(&self, features: impl IntoIterator<Item = S>) {
        *lock(&self.disabled_features) = features.into_iter().map(Into::into).collect();
    }

    pub fn broadcasts(&self) -> Vec<StateDelta> {
        lock(&self.broadcasts).clone()
    }

    fn engine_check(&self) -> Result<()> {
        if self.engine_down.load(Ordering::Relaxed) {
            return Err(ShieldError::Host("rule engine unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionHost for MemoryHost {
    async fn granted_origins(&self) -> Result<Vec<String>> {
        Ok(lock(&self.origins).clone())
    }
}

#[async_trait]
impl RuleEngine for MemoryHost {
    fn max_enabled_rule_sets(&self) -> usize {
        self.max_enabled
    }

    async fn catalog(&self) -> Result<Vec<RuleSetDetails>> {
        self.engine_check()?;
        Ok(lock(&self.catalog).clone())
    }

    async fn enabled_rule_sets(&self) -> Result<Vec<String>> {
        self.engine_check()?;
        Ok(lock(&self.engine_enabled).iter().cloned().collect())
    }

    async fn update_enabled_rule_sets(&self, enable: &[String], disable: &[String]) -> Result<()> {
        self.engine_check()?;
        let known: BTreeSet<String> = lock(&self.catalog).iter().map(|r| r.id.clone()).collect();
        let mut enabled = lock(&self.engine_enabled);
        let mut next = enabled.clone();
        for id in disable {
            next.remove(id);
        }
        for id in enable.iter().filter(|id| known.contains(*id)) {
            next.insert(id.clone());
        }
        if next.len() > self.max_enabled {
            return Err(ShieldError::Host("too many enabled static rule sets".into()));
        }
        *enabled = next;
        Ok(())
    }

    async fn recompile_dynamic_rules(&self, _cfg: &PolicyConfig) -> Result<()> {
        self.engine_check()?;
        self.dynamic_recompiles.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn refresh_session_rules(&self, input: &SessionRuleInput) -> Result<()> {
        self.engine_check()?;
        lock(&self.session_refreshes).push(input.clone());
        Ok(())
    }

    fn supports_blocked_count(&self) -> bool {
        true
    }

    async fn set_blocked_count_badge(&self, show: bool) -> Result<()> {
        *lock(&self.badge) = Some(show);
        Ok(())
    }

    async fn effective_dynamic_rules(&self) -> Result<Vec<Value>> {
        self.engine_check()?;
        Ok(lock(&self.dynamic_rules).clone())
    }

    /// One allow-all rule per strict-block exclusion of the latest refresh.
    async fn effective_session_rules(&self) -> Result<Vec<Value>> {
        self.engine_check()?;
        let Some(input) = lock(&self.session_refreshes).last().cloned() else {
            return Ok(Vec::new());
        };
        if !input.strict_block_mode {
            return Ok(Vec::new());
        }
        Ok(input
            .strict_block_exclusions
            .iter()
            .enumerate()
            .map(|(i, host)| {
                json!({
                    "id": i + 1,
                    "action": { "type": "allowAllRequests" },
                    "condition": { "requestDomains": [host], "resourceTypes": ["main_frame"] },
                })
            })
            .collect())
    }
}

#[async_trait]
impl ScriptingHost for MemoryHost {
    async fn registered(&self) -> Result<Vec<Injectable>> {
        Ok(self.registered_injectables())
    }

    async fn unregister(&self, ids: &[String]) -> Result<()> {
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        let mut reg = lock(&self.registered);
        for id in ids {
            reg.remove(id);
        }
        Ok(())
    }

    async fn register(&self, items: &[Injectable]) -> Result<()> {
        self.register_calls.fetch_add(1, Ordering::Relaxed);
        let mut reg = lock(&self.registered);
        for item in items {
            reg.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn insert_css(&self, target: FrameTarget, css: &str) -> Result<()> {
        lock(&self.css_ops).push(("insert".into(), target, css.into()));
        Ok(())
    }

    async fn remove_css(&self, target: FrameTarget, css: &str) -> Result<()> {
        lock(&self.css_ops).push(("remove".into(), target, css.into()));
        Ok(())
    }

    async fn execute_script(&self, target: FrameTarget, files: &[&str]) -> Result<()> {
        lock(&self.scripts).push((target, files.iter().map(|f| f.to_string()).collect()));
        Ok(())
    }
}

#[async_trait]
impl TabsHost for MemoryHost {
    async fn navigate(&self, tab_id: i64, url: &str) -> Result<()> {
        if !lock(&self.open_tabs).contains(&tab_id) {
            return Err(ShieldError::Host(format!("no tab with id {tab_id}")));
        }
        lock(&self.navigations).push((tab_id, url.into()));
        Ok(())
    }

    async fn toggle_icon(&self, tab_id: i64) -> Result<()> {
        lock(&self.icon_toggles).push(tab_id);
        Ok(())
    }

    async fn open_url(&self, url: &str) -> Result<()> {
        lock(&self.opened_urls).push(url.into());
        Ok(())
    }
}

#[async_trait]
impl RuntimeHost for MemoryHost {
    async fn reload(&self) -> Result<()> {
        self.reloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn set_developer_mode(&self, enabled: bool) -> Result<()> {
        lock(&self.developer_mode_calls).push(enabled);
        Ok(())
    }
}

#[async_trait]
impl AdminPolicy for MemoryHost {
    async fn rule_set_overrides(&self) -> Result<Vec<String>> {
        Ok(lock(&self.admin_overrides).clone())
    }

    async fn disabled_features(&self) -> Result<Vec<String>> {
        Ok(lock(&self.disabled_features).clone())
    }
}

impl Broadcaster for MemoryHost {
    fn broadcast(&self, delta: StateDelta) {
        lock(&self.broadcasts).push(delta);
    }
}
