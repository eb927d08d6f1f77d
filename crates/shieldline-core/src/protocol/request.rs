//! Inbound requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::level::FilteringLevel;

/// Trust tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// Scoped to the sending tab/frame; no origin check.
    Context,
    /// Reads or mutates policy; sender origin must be our own.
    Trusted,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Context => "context",
            Tier::Trusted => "trusted",
        }
    }
}

/// Request envelope (field `what` selects the variant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "what", rename_all = "camelCase")]
pub enum Request {
    InsertStyle {
        css: String,
    },
    RemoveStyle {
        css: String,
    },
    ToggleIcon,
    /// Inject the procedural CSS API into the sender frame; reply waits for it.
    InjectProceduralApi,

    #[serde(rename_all = "camelCase")]
    ApplyRuleSets {
        enabled_rule_sets: Vec<String>,
    },
    GetDefaultLevel,
    SetDefaultLevel {
        level: FilteringLevel,
    },
    GetLevel {
        hostname: String,
    },
    SetLevel {
        hostname: String,
        level: FilteringLevel,
    },
    GetLevelDetails,
    SetLevelDetails {
        details: LevelDetails,
    },
    #[serde(rename_all = "camelCase")]
    RequestUpgrade {
        hostname: String,
        tab_id: i64,
        url: String,
        level: FilteringLevel,
    },
    ExcludeFromStrict {
        hostname: String,
        #[serde(default)]
        permanent: bool,
    },
    GetOptionsData,
    GetPopupData {
        hostname: String,
    },
    GetRuleSetDetails,
    SetAutoReload {
        state: bool,
    },
    SetShowBlockedCount {
        state: bool,
    },
    SetStrictBlockMode {
        state: bool,
    },
    SetDeveloperMode {
        state: bool,
    },
    /// Open a page of our own (or a documentation link) in a new tab.
    #[serde(rename = "gotoURL")]
    GotoUrl {
        url: String,
    },
    GetEffectiveDynamicRules,
    GetEffectiveSessionRules,
}

impl Request {
    pub fn tier(&self) -> Tier {
        match self {
            Request::InsertStyle { .. }
            | Request::RemoveStyle { .. }
            | Request::ToggleIcon
            | Request::InjectProceduralApi => Tier::Context,
            _ => Tier::Trusted,
        }
    }

    /// Wire name, used for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::InsertStyle { .. } => "insertStyle",
            Request::RemoveStyle { .. } => "removeStyle",
            Request::ToggleIcon => "toggleIcon",
            Request::InjectProceduralApi => "injectProceduralApi",
            Request::ApplyRuleSets { .. } => "applyRuleSets",
            Request::GetDefaultLevel => "getDefaultLevel",
            Request::SetDefaultLevel { .. } => "setDefaultLevel",
            Request::GetLevel { .. } => "getLevel",
            Request::SetLevel { .. } => "setLevel",
            Request::GetLevelDetails => "getLevelDetails",
            Request::SetLevelDetails { .. } => "setLevelDetails",
            Request::RequestUpgrade { .. } => "requestUpgrade",
            Request::ExcludeFromStrict { .. } => "excludeFromStrict",
            Request::GetOptionsData => "getOptionsData",
            Request::GetPopupData { .. } => "getPopupData",
            Request::GetRuleSetDetails => "getRuleSetDetails",
            Request::SetAutoReload { .. } => "setAutoReload",
            Request::SetShowBlockedCount { .. } => "setShowBlockedCount",
            Request::SetStrictBlockMode { .. } => "setStrictBlockMode",
            Request::SetDeveloperMode { .. } => "setDeveloperMode",
            Request::GotoUrl { .. } => "gotoURL",
            Request::GetEffectiveDynamicRules => "getEffectiveDynamicRules",
            Request::GetEffectiveSessionRules => "getEffectiveSessionRules",
        }
    }
}

/// Identity of the context that sent a request, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSender {
    #[serde(default)]
    pub tab_id: Option<i64>,
    #[serde(default)]
    pub frame_id: Option<i64>,
    /// Some hosts never report it.
    #[serde(default)]
    pub origin: Option<String>,
}

/// Full override map: default level plus explicit per-host levels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelDetails {
    pub default_level: FilteringLevel,
    #[serde(default)]
    pub per_host: BTreeMap<String, FilteringLevel>,
}
