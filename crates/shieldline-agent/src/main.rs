//! shieldline agent demo binary.
//!
//! Boots the agent against the in-memory host, replays a short permission
//! upgrade flow, and prints the resulting state and metrics.

use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use shieldline_agent::host::memory::MemoryHost;
use shieldline_agent::store::MemoryKv;
use shieldline_agent::{config, Agent};
use shieldline_core::error::Result;
use shieldline_core::protocol::MessageSender;

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "shieldline.yaml".to_string());
    let cfg = config::load_from_file(&path)?;

    let host = Arc::new(MemoryHost::demo(cfg.engine.max_enabled_rule_sets));
    host.open_tab(1);
    let origin = cfg.agent.origin.clone();
    let agent = Agent::new(
        cfg,
        host.hosts(),
        Arc::new(MemoryKv::default()),
        Arc::new(MemoryKv::default()),
    )?;

    let outcome = agent.boot().await;
    tracing::info!(outcome = outcome.as_str(), "boot finished");

    let ui = MessageSender {
        origin: Some(origin),
        ..Default::default()
    };
    let reply = agent
        .on_message_json(
            json!({ "what": "requestUpgrade", "hostname": "example.com", "tabId": 1, "url": "https://example.com/", "level": 3 }),
            &ui,
        )
        .await;
    tracing::info!(%reply, "upgrade requested");

    let granted = vec!["*://*.example.com/*".to_string()];
    host.set_origins(granted.clone());
    agent.on_permissions_added(&granted).await?.settle().await;

    println!("{}", agent.describe().await);
    print!("{}", agent.render_metrics());
    Ok(())
}
