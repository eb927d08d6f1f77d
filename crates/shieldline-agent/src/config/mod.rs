//! Agent config loader (strict parsing).

pub mod schema;

use std::fs;

use shieldline_core::error::{Result, ShieldError};

pub use schema::{AgentConfig, AgentSection, EngineSection, Flavor};

pub fn load_from_file(path: &str) -> Result<AgentConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| ShieldError::Internal(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<AgentConfig> {
    let cfg: AgentConfig = serde_yaml::from_str(s)
        .map_err(|e| ShieldError::BadRequest(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
