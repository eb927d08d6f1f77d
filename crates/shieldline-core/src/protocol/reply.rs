//! Replies and broadcast deltas.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ShieldError;
use crate::level::FilteringLevel;
use crate::protocol::request::LevelDetails;

/// Reply delivered through the request's callback.
pub type Reply = std::result::Result<Response, ErrorPayload>;

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    None,
    Level(FilteringLevel),
    RuleSets(EnabledRuleSets),
    LevelDetails(LevelDetails),
    Options(Box<OptionsData>),
    Popup(PopupData),
    RuleSetDetails(Vec<RuleSetDetails>),
    /// Engine rules, passed through as the engine reports them.
    Rules(Vec<Value>),
}

/// Error payload returned to the caller of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub msg: String,
}

impl From<&ShieldError> for ErrorPayload {
    fn from(e: &ShieldError) -> Self {
        Self {
            code: e.client_code().as_str(),
            msg: e.to_string(),
        }
    }
}

impl From<ShieldError> for ErrorPayload {
    fn from(e: ShieldError) -> Self {
        ErrorPayload::from(&e)
    }
}

/// Encode a reply for the host message channel.
pub fn reply_json(reply: &Reply) -> Value {
    match reply {
        Ok(resp) => serde_json::to_value(resp).unwrap_or(Value::Null),
        Err(e) => json!({ "error": { "code": e.code, "msg": e.msg } }),
    }
}

/// Outcome of enabling a set of rule sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnabledRuleSets {
    /// Effective enabled set after the engine applied the change.
    pub enabled: Vec<String>,
    /// Requested ids the engine does not know.
    pub rejected: Vec<String>,
}

/// Rule-set catalog entry provided by the rule engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSetDetails {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled_by_default: bool,
    /// Carries cosmetic filters, i.e. contributes injectables.
    #[serde(default)]
    pub has_cosmetics: bool,
}

/// Options page snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionsData {
    pub has_broad_grant: bool,
    pub default_level: FilteringLevel,
    pub enabled_rule_sets: Vec<String>,
    pub admin_rule_sets: Vec<String>,
    pub max_enabled_rule_sets: usize,
    pub rule_set_details: Vec<RuleSetDetails>,
    pub auto_reload: bool,
    pub show_blocked_count: bool,
    pub can_show_blocked_count: bool,
    pub strict_block_mode: bool,
    pub first_run: bool,
    pub developer_mode: bool,
    pub disabled_features: Vec<String>,
}

/// Popup panel snapshot for one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PopupData {
    pub has_broad_grant: bool,
    pub level: FilteringLevel,
    pub auto_reload: bool,
    pub developer_mode: bool,
    pub disabled_features: Vec<String>,
}

/// State change broadcast to all listening contexts, e.g. `{"autoReload":true}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StateDelta {
    EnabledRuleSets(Vec<String>),
    DefaultLevel(FilteringLevel),
    Level { hostname: String, level: FilteringLevel },
    AutoReload(bool),
    ShowBlockedCount(bool),
    StrictBlockMode(bool),
    DeveloperMode(bool),
}
