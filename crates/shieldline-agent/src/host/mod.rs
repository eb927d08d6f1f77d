//! Host collaborators (permission model, rule engine, scripting, tabs).
//!
//! The agent never talks to the browser directly; each concern is an async
//! trait so the orchestration can run against the real host or the
//! in-memory one in [`memory`].

pub mod memory;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use shieldline_core::error::Result;
use shieldline_core::protocol::{RuleSetDetails, StateDelta};

use crate::scripting::Injectable;
use crate::store::PolicyConfig;

/// Read side of the user's permission grants.
#[async_trait]
pub trait PermissionHost: Send + Sync {
    /// Origin patterns currently granted (e.g. `*://*.example.com/*`).
    async fn granted_origins(&self) -> Result<Vec<String>>;
}

/// Inputs for regenerating runtime-only rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRuleInput {
    pub strict_block_mode: bool,
    /// Hostnames exempt from strict blocking (permanent and temporary).
    pub strict_block_exclusions: BTreeSet<String>,
}

/// The host's declarative rule-evaluation engine.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// Engine-imposed cap on simultaneously enabled static rule sets.
    fn max_enabled_rule_sets(&self) -> usize;
    async fn catalog(&self) -> Result<Vec<RuleSetDetails>>;
    async fn enabled_rule_sets(&self) -> Result<Vec<String>>;
    async fn update_enabled_rule_sets(&self, enable: &[String], disable: &[String]) -> Result<()>;
    /// Compile custom/user filters into persisted dynamic rules.
    async fn recompile_dynamic_rules(&self, cfg: &PolicyConfig) -> Result<()>;
    async fn refresh_session_rules(&self, input: &SessionRuleInput) -> Result<()>;
    fn supports_blocked_count(&self) -> bool;
    async fn set_blocked_count_badge(&self, show: bool) -> Result<()>;
    /// Dynamic rules as the engine currently holds them.
    async fn effective_dynamic_rules(&self) -> Result<Vec<Value>>;
    /// Session rules as the engine currently holds them.
    async fn effective_session_rules(&self) -> Result<Vec<Value>>;
}

/// Tab/frame addressed by a scripting call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTarget {
    pub tab_id: i64,
    /// `None` targets the top frame only.
    pub frame_id: Option<i64>,
}

#[async_trait]
pub trait ScriptingHost: Send + Sync {
    async fn registered(&self) -> Result<Vec<Injectable>>;
    async fn unregister(&self, ids: &[String]) -> Result<()>;
    async fn register(&self, items: &[Injectable]) -> Result<()>;
    async fn insert_css(&self, target: FrameTarget, css: &str) -> Result<()>;
    async fn remove_css(&self, target: FrameTarget, css: &str) -> Result<()>;
    async fn execute_script(&self, target: FrameTarget, files: &[&str]) -> Result<()>;
}

#[async_trait]
pub trait TabsHost: Send + Sync {
    /// Navigate a tab. Fails if the tab is gone.
    async fn navigate(&self, tab_id: i64, url: &str) -> Result<()>;
    async fn toggle_icon(&self, tab_id: i64) -> Result<()>;
    /// Open `url` in a new tab. Relative URLs resolve against the agent's own pages.
    async fn open_url(&self, url: &str) -> Result<()>;
}

#[async_trait]
pub trait RuntimeHost: Send + Sync {
    /// Hard-restart the whole agent process.
    async fn reload(&self) -> Result<()>;
    /// Tell the host whether developer tooling (e.g. the rule debug feed)
    /// should be active. Not persisted by the host; reapplied at every start.
    async fn set_developer_mode(&self, enabled: bool) -> Result<()>;
}

/// Administrator-managed settings; these override user settings.
#[async_trait]
pub trait AdminPolicy: Send + Sync {
    /// Rule-set overrides: `+id` forces on, `-id` forces off.
    async fn rule_set_overrides(&self) -> Result<Vec<String>>;
    async fn disabled_features(&self) -> Result<Vec<String>>;
}

/// Fan-out of state deltas to every listening UI context.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, delta: StateDelta);
}

/// All host collaborators, shared by every component.
#[derive(Clone)]
pub struct Hosts {
    pub permissions: Arc<dyn PermissionHost>,
    pub engine: Arc<dyn RuleEngine>,
    pub scripting: Arc<dyn ScriptingHost>,
    pub tabs: Arc<dyn TabsHost>,
    pub runtime: Arc<dyn RuntimeHost>,
    pub admin: Arc<dyn AdminPolicy>,
    pub broadcaster: Arc<dyn Broadcaster>,
}
