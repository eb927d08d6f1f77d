#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use std::time::Duration;

use serde_json::json;

use harness::{config, config_for, content, ui, Rig};
use shieldline_agent::dispatch::{ENTER_PICKER_MODE, ENTER_ZAPPER_MODE};
use shieldline_agent::host::FrameTarget;
use shieldline_core::protocol::{MessageSender, Request, Response, StateDelta};
use shieldline_core::FilteringLevel;

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn untrusted_origin_refused() {
    let rig = Rig::booted(config()).await;
    let evil = MessageSender {
        origin: Some("https://evil.example".into()),
        ..Default::default()
    };

    let reply = rig
        .agent
        .on_message_json(json!({ "what": "setDefaultLevel", "level": 0 }), &evil)
        .await;
    assert_eq!(reply["error"]["code"], "NOT_ALLOWED");
    assert_eq!(rig.agent.reconciler().get_default_level().await, FilteringLevel::Basic);
    assert_eq!(
        rig.agent.metrics().untrusted_rejections.get(&[("kind", "setDefaultLevel")]),
        1
    );
}

#[tokio::test]
async fn origin_check_is_case_insensitive_and_optional() {
    let rig = Rig::booted(config()).await;
    let shouting = MessageSender {
        origin: Some("CHROME-EXTENSION://SHIELDLINE/".into()),
        ..Default::default()
    };
    let silent = MessageSender::default();

    for sender in [shouting, silent] {
        let reply = rig.agent.on_message(Request::GetDefaultLevel, &sender).await;
        assert_eq!(reply, Ok(Response::Level(FilteringLevel::Basic)));
    }
}

#[tokio::test]
async fn style_requests_target_sender_frame() {
    let rig = Rig::booted(config()).await;
    let from_page = content(5, 2);

    let reply = rig
        .agent
        .on_message(Request::InsertStyle { css: "a{}".into() }, &from_page)
        .await;
    assert_eq!(reply, Ok(Response::None));
    rig.agent
        .on_message(Request::RemoveStyle { css: "a{}".into() }, &from_page)
        .await
        .unwrap();
    settle().await;

    let target = FrameTarget {
        tab_id: 5,
        frame_id: Some(2),
    };
    let ops = rig.host.css_ops();
    assert!(ops.contains(&("insert".to_string(), target, "a{}".to_string())));
    assert!(ops.contains(&("remove".to_string(), target, "a{}".to_string())));
    assert_eq!(rig.agent.metrics().untrusted_rejections.get(&[("kind", "insertStyle")]), 0);
}

#[tokio::test]
async fn safari_skips_subframe_style_insertion() {
    let rig = Rig::booted(config_for("safari", harness::VERSION, 3)).await;
    rig.agent
        .on_message(Request::InsertStyle { css: "a{}".into() }, &content(5, 2))
        .await
        .unwrap();
    rig.agent
        .on_message(Request::InsertStyle { css: "b{}".into() }, &content(5, 0))
        .await
        .unwrap();
    settle().await;

    let ops = rig.host.css_ops();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].2, "b{}");
}

#[tokio::test]
async fn context_requests_without_tab_are_ignored() {
    let rig = Rig::booted(config()).await;
    let reply = rig
        .agent
        .on_message(Request::InsertStyle { css: "a{}".into() }, &ui())
        .await;
    assert_eq!(reply, Ok(Response::None));
    rig.agent.on_message(Request::ToggleIcon, &ui()).await.unwrap();
    settle().await;
    assert!(rig.host.css_ops().is_empty());
    assert!(rig.host.icon_toggles().is_empty());
}

#[tokio::test]
async fn icon_toggle_and_procedural_api() {
    let rig = Rig::booted(config()).await;
    rig.agent.on_message(Request::ToggleIcon, &content(4, 0)).await.unwrap();
    rig.agent
        .on_message(Request::InjectProceduralApi, &content(4, 1))
        .await
        .unwrap();

    // The procedural API reply is sent only after injection.
    let scripts = rig.host.scripts();
    assert_eq!(scripts.len(), 1);
    assert_eq!(scripts[0].0, FrameTarget { tab_id: 4, frame_id: Some(1) });
    assert_eq!(scripts[0].1, vec!["/js/scripting/css-procedural-api.js".to_string()]);

    settle().await;
    assert_eq!(rig.host.icon_toggles(), vec![4]);
}

#[tokio::test]
async fn apply_rule_sets_over_limit_reports_and_broadcasts() {
    let rig = Rig::booted(config()).await;
    let reply = rig
        .agent
        .on_message_json(
            json!({
                "what": "applyRuleSets",
                "enabledRuleSets": ["default", "badware", "annoyances-cookies", "privacy-urls"]
            }),
            &ui(),
        )
        .await;
    assert_eq!(reply["error"]["code"], "LIMIT_EXCEEDED");
    assert_eq!(
        rig.host.broadcasts().last(),
        Some(&StateDelta::EnabledRuleSets(vec!["badware".into(), "default".into()]))
    );
    assert_eq!(
        rig.agent
            .metrics()
            .request_errors
            .get(&[("kind", "applyRuleSets"), ("code", "LIMIT_EXCEEDED")]),
        1
    );
}

#[tokio::test]
async fn apply_rule_sets_registers_injectables() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["<all_urls>"]);
    rig.agent
        .on_message(Request::SetDefaultLevel { level: FilteringLevel::Complete }, &ui())
        .await
        .unwrap();

    let reply = rig
        .agent
        .on_message_json(
            json!({ "what": "applyRuleSets", "enabledRuleSets": ["default", "annoyances-cookies"] }),
            &ui(),
        )
        .await;
    assert_eq!(reply["enabled"], json!(["annoyances-cookies", "default"]));
    assert_eq!(reply["rejected"], json!([]));

    let ids: Vec<String> = rig.host.registered_injectables().into_iter().map(|i| i.id).collect();
    assert_eq!(
        ids,
        vec![
            "annoyances-cookies.generic",
            "annoyances-cookies.specific",
            "default.generic",
            "default.specific"
        ]
    );
}

#[tokio::test]
async fn set_level_persists_then_broadcasts() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["*://*.example.com/*"]);

    let reply = rig
        .agent
        .on_message_json(
            json!({ "what": "setLevel", "hostname": "Example.com", "level": 2 }),
            &ui(),
        )
        .await;
    assert_eq!(reply, json!(2));
    assert_eq!(
        rig.host.broadcasts().last(),
        Some(&StateDelta::Level {
            hostname: "example.com".into(),
            level: FilteringLevel::Optimal
        })
    );
    let stored = rig.local.get(shieldline_agent::store::POLICY_KEY).unwrap();
    assert_eq!(stored["perHostLevel"]["example.com"], json!(2));

    let reply = rig
        .agent
        .on_message_json(json!({ "what": "getLevel", "hostname": "www.example.com" }), &ui())
        .await;
    assert_eq!(reply, json!(2));
}

#[tokio::test]
async fn set_default_level_is_clamped_not_forced() {
    let rig = Rig::booted(config()).await;
    let broadcasts = rig.host.broadcasts().len();

    let reply = rig
        .agent
        .on_message(Request::SetDefaultLevel { level: FilteringLevel::Complete }, &ui())
        .await;
    assert_eq!(reply, Ok(Response::Level(FilteringLevel::Basic)));
    assert_eq!(rig.host.broadcasts().len(), broadcasts);

    let reply = rig
        .agent
        .on_message(Request::SetDefaultLevel { level: FilteringLevel::Disabled }, &ui())
        .await;
    assert_eq!(reply, Ok(Response::Level(FilteringLevel::Disabled)));
    assert_eq!(
        rig.host.broadcasts().last(),
        Some(&StateDelta::DefaultLevel(FilteringLevel::Disabled))
    );
}

#[tokio::test]
async fn level_details_round_trip_through_grants() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["*://*.granted.org/*"]);

    let reply = rig
        .agent
        .on_message_json(
            json!({
                "what": "setLevelDetails",
                "details": {
                    "defaultLevel": 1,
                    "perHost": { "granted.org": 3, "ungranted.org": 3, "off.org": 0, "same.org": 1 }
                }
            }),
            &ui(),
        )
        .await;
    assert_eq!(
        reply,
        json!({ "defaultLevel": 1, "perHost": { "granted.org": 3, "off.org": 0 } })
    );

    let reply = rig
        .agent
        .on_message_json(json!({ "what": "getLevelDetails" }), &ui())
        .await;
    assert_eq!(reply["perHost"]["granted.org"], json!(3));
}

#[tokio::test]
async fn flag_setters_persist_and_broadcast() {
    let rig = Rig::booted(config()).await;

    rig.agent.on_message(Request::SetAutoReload { state: false }, &ui()).await.unwrap();
    rig.agent
        .on_message(Request::SetShowBlockedCount { state: false }, &ui())
        .await
        .unwrap();
    rig.agent
        .on_message(Request::SetStrictBlockMode { state: false }, &ui())
        .await
        .unwrap();

    let cfg = rig.agent.store().snapshot().await;
    assert!(!cfg.auto_reload && !cfg.show_blocked_count && !cfg.strict_block_mode);
    assert_eq!(rig.host.badge(), Some(false));
    assert!(!rig.host.session_refreshes().last().unwrap().strict_block_mode);

    let tail: Vec<StateDelta> = rig.host.broadcasts().into_iter().rev().take(3).rev().collect();
    assert_eq!(
        tail,
        vec![
            StateDelta::AutoReload(false),
            StateDelta::ShowBlockedCount(false),
            StateDelta::StrictBlockMode(false)
        ]
    );
}

#[tokio::test]
async fn developer_mode_respects_admin() {
    let rig = Rig::booted(config()).await;
    let reply = rig
        .agent
        .on_message(Request::SetDeveloperMode { state: true }, &ui())
        .await;
    assert_eq!(reply, Ok(Response::None));
    assert!(rig.agent.store().snapshot().await.developer_mode);

    rig.host.set_disabled_features(["develop"]);
    rig.agent
        .on_message(Request::SetDeveloperMode { state: false }, &ui())
        .await
        .unwrap();
    let reply = rig
        .agent
        .on_message_json(json!({ "what": "setDeveloperMode", "state": true }), &ui())
        .await;
    assert_eq!(reply["error"]["code"], "NOT_ALLOWED");
    assert!(!rig.agent.store().snapshot().await.developer_mode);
    // Boot applies the stored state, then each accepted change is forwarded.
    assert_eq!(rig.host.developer_mode_calls(), vec![false, true, false]);
}

#[tokio::test]
async fn goto_url_opens_a_tab() {
    let rig = Rig::booted(config()).await;
    let reply = rig
        .agent
        .on_message_json(json!({ "what": "gotoURL", "url": "dashboard.html#settings" }), &ui())
        .await;
    assert_eq!(reply, serde_json::Value::Null);
    assert_eq!(rig.host.opened_urls(), vec!["dashboard.html#settings".to_string()]);

    let evil = MessageSender {
        origin: Some("https://evil.example".into()),
        ..Default::default()
    };
    let reply = rig
        .agent
        .on_message_json(json!({ "what": "gotoURL", "url": "https://evil.example/" }), &evil)
        .await;
    assert_eq!(reply["error"]["code"], "NOT_ALLOWED");
    assert_eq!(rig.host.opened_urls().len(), 1);
}

#[tokio::test]
async fn effective_rules_pass_through_engine() {
    let rig = Rig::booted(config()).await;
    let dynamic = vec![json!({ "id": 1, "action": { "type": "block" }, "condition": { "urlFilter": "||ads.example^" } })];
    rig.host.set_dynamic_rules(dynamic.clone());

    let reply = rig
        .agent
        .on_message(Request::GetEffectiveDynamicRules, &ui())
        .await;
    assert_eq!(reply, Ok(Response::Rules(dynamic)));

    rig.agent
        .on_message(Request::SetStrictBlockMode { state: true }, &ui())
        .await
        .unwrap();
    rig.agent
        .on_message(
            Request::ExcludeFromStrict {
                hostname: "Example.com".into(),
                permanent: false,
            },
            &ui(),
        )
        .await
        .unwrap();
    let reply = rig
        .agent
        .on_message_json(json!({ "what": "getEffectiveSessionRules" }), &ui())
        .await;
    let rules = reply.as_array().expect("session rules");
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["condition"]["requestDomains"], json!(["example.com"]));

    rig.host.set_engine_down(true);
    let reply = rig
        .agent
        .on_message_json(json!({ "what": "getEffectiveDynamicRules" }), &ui())
        .await;
    assert!(reply.get("error").is_some());
}

#[tokio::test]
async fn snapshots_for_ui() {
    let rig = Rig::booted(config()).await;
    rig.host.set_admin_overrides(["+privacy-urls"]);

    let options = rig
        .agent
        .on_message_json(json!({ "what": "getOptionsData" }), &ui())
        .await;
    assert_eq!(options["hasBroadGrant"], json!(false));
    assert_eq!(options["defaultLevel"], json!(1));
    assert_eq!(options["enabledRuleSets"], json!(["badware", "default"]));
    assert_eq!(options["adminRuleSets"], json!(["+privacy-urls"]));
    assert_eq!(options["maxEnabledRuleSets"], json!(3));
    assert_eq!(options["ruleSetDetails"].as_array().unwrap().len(), 5);
    assert_eq!(options["canShowBlockedCount"], json!(true));
    assert_eq!(options["firstRun"], json!(false));

    let popup = rig
        .agent
        .on_message_json(json!({ "what": "getPopupData", "hostname": "example.com" }), &ui())
        .await;
    assert_eq!(popup["level"], json!(1));
    assert_eq!(popup["autoReload"], json!(true));

    let details = rig
        .agent
        .on_message_json(json!({ "what": "getRuleSetDetails" }), &ui())
        .await;
    assert_eq!(details[0]["id"], "default");
}

#[tokio::test]
async fn exclude_from_strict_over_the_wire() {
    let rig = Rig::booted(config()).await;
    let reply = rig
        .agent
        .on_message_json(
            json!({ "what": "excludeFromStrict", "hostname": "Blocked.example", "permanent": true }),
            &ui(),
        )
        .await;
    assert_eq!(reply, serde_json::Value::Null);
    assert!(rig
        .agent
        .store()
        .snapshot()
        .await
        .strict_block_exclusions
        .contains("blocked.example"));
}

#[tokio::test]
async fn undecodable_message_is_bad_request() {
    let rig = Rig::booted(config()).await;
    let reply = rig.agent.on_message_json(json!({ "what": "bogus" }), &ui()).await;
    assert_eq!(reply["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn commands_inject_fixed_bundles() {
    let rig = Rig::booted(config()).await;
    rig.agent.on_command(ENTER_ZAPPER_MODE, 3).await.unwrap();
    rig.agent.on_command(ENTER_PICKER_MODE, 3).await.unwrap();

    let scripts = rig.host.scripts();
    let top = FrameTarget {
        tab_id: 3,
        frame_id: None,
    };
    assert_eq!(scripts[0].0, top);
    assert_eq!(
        scripts[0].1,
        vec!["/js/scripting/tool-overlay.js", "/js/scripting/zapper.js"]
    );
    assert_eq!(scripts[1].1.len(), 3);
    assert_eq!(scripts[1].1[2], "/js/scripting/picker.js");

    let err = rig.agent.on_command("enter-nowhere", 3).await.unwrap_err();
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}
