#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::sync::Arc;

use serde_json::json;

use harness::{config, strings, ui, Rig};
use shieldline_agent::host::memory::MemoryHost;
use shieldline_agent::policy::GrantOutcome;
use shieldline_agent::session::SessionState;
use shieldline_agent::store::POLICY_KEY;
use shieldline_core::FilteringLevel;

#[tokio::test]
async fn fresh_install_without_broad_grant() {
    let rig = Rig::booted(config()).await;
    let cfg = rig.agent.store().snapshot().await;

    assert_eq!(cfg.default_level, FilteringLevel::max_ungranted());
    assert!(!cfg.first_run);
    assert_eq!(cfg.last_version, harness::VERSION);
    let visits = rig
        .agent
        .orchestrator()
        .visited()
        .into_iter()
        .filter(|s| *s == SessionState::RegisteringInjectables)
        .count();
    assert_eq!(visits, 1);
    // Nothing is filtered above Basic, so nothing to inject.
    assert!(rig.host.registered_injectables().is_empty());

    let stored = rig.local.get(POLICY_KEY).unwrap();
    assert_eq!(stored["firstRun"], json!(false));
    assert!(stored.get("wakeupRun").is_none());
}

#[tokio::test]
async fn fresh_install_with_broad_grant_registers_once() {
    let host = Arc::new(MemoryHost::demo(3));
    host.set_origins(["<all_urls>"]);
    let rig = Rig::with_host(config(), host);
    assert!(rig.agent.boot().await.is_ready());

    let cfg = rig.agent.store().snapshot().await;
    assert_eq!(cfg.default_level, FilteringLevel::Complete);
    assert!(!cfg.first_run);
    assert_eq!(rig.host.register_calls(), 1);

    let ids: Vec<String> = rig.host.registered_injectables().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["default.generic", "default.specific"]);
}

#[tokio::test]
async fn upgrade_flow_over_messages() {
    let rig = Rig::booted(config()).await;
    rig.host.open_tab(7);

    let reply = rig
        .agent
        .on_message_json(
            json!({
                "what": "requestUpgrade",
                "hostname": "example.com",
                "tabId": 7,
                "url": "https://example.com/page",
                "level": 3
            }),
            &ui(),
        )
        .await;
    assert_eq!(reply, serde_json::Value::Null);
    // Nothing happens until the grant arrives.
    assert_eq!(
        rig.agent.reconciler().get_level("example.com").await.unwrap(),
        FilteringLevel::Basic
    );

    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());
    let GrantOutcome::Upgraded { reload: Some(reload), .. } = rig.agent.on_permissions_added(&granted).await.unwrap() else {
        panic!("grant must apply the pending upgrade");
    };
    reload.await.unwrap();

    let cfg = rig.agent.store().snapshot().await;
    assert_eq!(cfg.per_host_level.get("example.com"), Some(&FilteringLevel::Complete));
    assert_eq!(rig.host.navigations(), vec![(7, "https://example.com/page".to_string())]);

    let ids: Vec<String> = rig.host.registered_injectables().into_iter().map(|i| i.id).collect();
    assert_eq!(ids, vec!["default.generic", "default.specific"]);
}

#[tokio::test]
async fn over_limit_request_keeps_persisted_set() {
    let rig = Rig::booted(config()).await;
    let before = rig.agent.store().snapshot().await.enabled_rule_sets;

    let reply = rig
        .agent
        .on_message_json(
            json!({
                "what": "applyRuleSets",
                "enabledRuleSets": ["default", "badware", "annoyances-cookies", "annoyances-overlays"]
            }),
            &ui(),
        )
        .await;
    assert_eq!(reply["error"]["code"], "LIMIT_EXCEEDED");
    assert_eq!(rig.agent.store().snapshot().await.enabled_rule_sets, before);
    let stored = rig.local.get(POLICY_KEY).unwrap();
    assert_eq!(stored["enabledRuleSets"], json!(["badware", "default"]));
}

#[tokio::test]
async fn levels_never_outlive_grants() {
    let rig = Rig::booted(config()).await;
    let hosts = ["a.com", "b.com", "c.com"];
    let grants = [
        vec!["*://*.a.com/*", "*://*.b.com/*", "*://*.c.com/*"],
        vec!["*://*.a.com/*"],
        vec!["<all_urls>"],
        vec!["*://*.c.com/*"],
        vec![],
    ];

    for (step, granted) in grants.iter().enumerate() {
        rig.host.set_origins(granted.iter().copied());
        if step % 2 == 0 {
            rig.agent.on_permissions_added(&strings(granted)).await.unwrap();
        } else {
            rig.agent.on_permissions_removed().await.unwrap();
        }
        for h in hosts {
            rig.agent
                .reconciler()
                .set_level(h, FilteringLevel::Complete)
                .await
                .unwrap();
        }
        rig.agent
            .reconciler()
            .set_default_level(FilteringLevel::Complete)
            .await
            .unwrap();

        let live = rig.agent.reconciler().grants().await.unwrap();
        let cfg = rig.agent.store().snapshot().await;
        for (h, l) in &cfg.per_host_level {
            assert!(!l.requires_grant() || live.covers(h), "step {step}: {h} at {l}");
        }
        assert!(!cfg.default_level.requires_grant() || live.is_broad(), "step {step}");
    }
}
