use serde::Deserialize;
use shieldline_core::error::{Result, ShieldError};
use shieldline_core::version;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub version: u32,

    pub agent: AgentSection,

    #[serde(default)]
    pub engine: EngineSection,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ShieldError::UnsupportedVersion);
        }
        self.agent.validate()?;
        self.engine.validate()?;
        Ok(())
    }
}

/// Host platform flavor. Some behaviors work around host defects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flavor {
    #[default]
    Chromium,
    Firefox,
    Safari,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    /// Running build version, `year.monthday.minute`.
    pub version: String,

    #[serde(default)]
    pub flavor: Flavor,

    /// Our own origin; trusted requests must come from it.
    pub origin: String,

    #[serde(default = "default_reload_delay_ms")]
    pub reload_delay_ms: u64,

    /// Builds at or below this one may carry a bad strict-block setting on Safari.
    #[serde(default = "default_strict_block_fix_threshold")]
    pub strict_block_fix_threshold: String,
}

impl AgentSection {
    pub fn validate(&self) -> Result<()> {
        if version::ordinal(&self.version) == 0 {
            return Err(ShieldError::BadRequest(
                "agent.version must look like year.monthday.minute".into(),
            ));
        }
        if version::ordinal(&self.strict_block_fix_threshold) == 0 {
            return Err(ShieldError::BadRequest(
                "agent.strict_block_fix_threshold must look like year.monthday.minute".into(),
            ));
        }
        if self.origin.trim().is_empty() {
            return Err(ShieldError::BadRequest("agent.origin must not be empty".into()));
        }
        if self.reload_delay_ms > 10000 {
            return Err(ShieldError::BadRequest(
                "agent.reload_delay_ms must be between 0 and 10000".into(),
            ));
        }
        Ok(())
    }

    /// Origin normalized for comparison: lowercase, no trailing slash.
    pub fn normalized_origin(&self) -> String {
        self.origin.trim_end_matches('/').to_ascii_lowercase()
    }
}

fn default_reload_delay_ms() -> u64 {
    437
}
fn default_strict_block_fix_threshold() -> String {
    "2025.804.2359".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_max_enabled_rule_sets")]
    pub max_enabled_rule_sets: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_enabled_rule_sets: default_max_enabled_rule_sets(),
        }
    }
}

impl EngineSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1000).contains(&self.max_enabled_rule_sets) {
            return Err(ShieldError::BadRequest(
                "engine.max_enabled_rule_sets must be between 1 and 1000".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_enabled_rule_sets() -> usize {
    50
}
