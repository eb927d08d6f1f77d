#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]


use harness::{config, strings, Rig};
use shieldline_agent::policy::GrantOutcome;
use shieldline_core::grants::GrantSet;
use shieldline_core::FilteringLevel;

async fn assert_levels_within_grants(rig: &Rig) {
    let cfg = rig.agent.store().snapshot().await;
    let grants = rig.agent.reconciler().grants().await.unwrap();
    for (h, l) in &cfg.per_host_level {
        assert!(!l.requires_grant() || grants.covers(h), "{h} at {l} without grant");
    }
    assert!(!cfg.default_level.requires_grant() || grants.is_broad());
}

#[tokio::test]
async fn revoke_downgrades_to_basic() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["*://*.example.com/*"]);
    let r = rig.agent.reconciler();

    let (before, after) = r.set_level("example.com", FilteringLevel::Complete).await.unwrap();
    assert_eq!((before, after), (FilteringLevel::Basic, FilteringLevel::Complete));

    rig.host.set_origins(Vec::<String>::new());
    assert!(rig.agent.on_permissions_removed().await.unwrap());
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Basic);
    assert!(rig.agent.store().snapshot().await.per_host_level.is_empty());

    // Nothing left to downgrade.
    assert!(!rig.agent.on_permissions_removed().await.unwrap());
}

#[tokio::test]
async fn set_level_clamps_without_grant() {
    let rig = Rig::booted(config()).await;
    let r = rig.agent.reconciler();

    let (_, after) = r.set_level("nogrant.org", FilteringLevel::Complete).await.unwrap();
    assert_eq!(after, FilteringLevel::Basic);

    let (_, after) = r.set_level("nogrant.org", FilteringLevel::Disabled).await.unwrap();
    assert_eq!(after, FilteringLevel::Disabled);
    assert_levels_within_grants(&rig).await;
}

#[tokio::test]
async fn subdomains_inherit_parent_level() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["*://*.example.com/*"]);
    let r = rig.agent.reconciler();

    r.set_level("Example.com", FilteringLevel::Optimal).await.unwrap();
    assert_eq!(r.get_level("news.example.com").await.unwrap(), FilteringLevel::Optimal);
    assert_eq!(r.get_level("example.org").await.unwrap(), FilteringLevel::Basic);

    let err = r.get_level("not a host").await.unwrap_err();
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[tokio::test]
async fn pending_upgrade_consumed_once() {
    let rig = Rig::booted(config()).await;
    rig.host.open_tab(7);
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 7, "https://example.com/a", FilteringLevel::Complete)
        .await
        .unwrap();
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());

    let first = rig.agent.on_permissions_added(&granted).await.unwrap();
    let second = rig.agent.on_permissions_added(&granted).await.unwrap();

    let GrantOutcome::Upgraded { hostname, level, reload } = first else {
        panic!("first grant event must apply the upgrade");
    };
    assert_eq!(hostname, "example.com");
    assert_eq!(level, FilteringLevel::Complete);
    reload.expect("auto reload is on").await.unwrap();
    assert!(matches!(second, GrantOutcome::Resynced { changed: false }));

    assert_eq!(rig.host.navigations(), vec![(7, "https://example.com/a".to_string())]);
    assert_eq!(
        rig.agent.metrics().grant_events.get(&[("event", "added"), ("outcome", "upgraded")]),
        1
    );
}

#[tokio::test]
async fn concurrent_grant_events_apply_upgrade_once() {
    let rig = Rig::booted(config()).await;
    rig.host.open_tab(7);
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 7, "https://example.com/a", FilteringLevel::Complete)
        .await
        .unwrap();
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());

    let (a, b) = tokio::join!(
        rig.agent.on_permissions_added(&granted),
        rig.agent.on_permissions_added(&granted)
    );
    let outcomes = [a.unwrap(), b.unwrap()];
    let upgraded = outcomes
        .iter()
        .filter(|o| matches!(o, GrantOutcome::Upgraded { .. }))
        .count();
    assert_eq!(upgraded, 1);
    for out in outcomes {
        assert!(out.settle().await);
    }

    assert_eq!(rig.host.navigations(), vec![(7, "https://example.com/a".to_string())]);
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Complete);
    assert!(r.pending().peek().is_none());
}

#[tokio::test]
async fn upgrade_to_current_level_is_a_no_op() {
    let rig = Rig::booted(config()).await;
    rig.host.open_tab(7);
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());
    let r = rig.agent.reconciler();
    r.set_level("example.com", FilteringLevel::Optimal).await.unwrap();

    r.request_upgrade("example.com", 7, "https://example.com/", FilteringLevel::Optimal)
        .await
        .unwrap();
    let registers = rig.host.register_calls();
    let out = rig.agent.on_permissions_added(&granted).await.unwrap();
    assert!(matches!(out, GrantOutcome::NotApplicable));
    assert!(out.settle().await);

    assert!(rig.host.navigations().is_empty());
    assert_eq!(rig.host.register_calls(), registers);
    assert!(r.pending().peek().is_none());
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Optimal);
}

#[tokio::test]
async fn cancelled_reload_reports_failure() {
    let reload = tokio::spawn(std::future::pending::<()>());
    reload.abort();
    let out = GrantOutcome::Upgraded {
        hostname: "example.com".into(),
        level: FilteringLevel::Complete,
        reload: Some(reload),
    };
    assert!(!out.settle().await);
    assert!(GrantOutcome::Stale.settle().await);
}

#[tokio::test]
async fn stale_token_is_dropped() {
    let rig = Rig::booted(config()).await;
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 7, "https://example.com/", FilteringLevel::Complete)
        .await
        .unwrap();
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());
    r.set_level("example.com", FilteringLevel::Optimal).await.unwrap();

    let out = rig.agent.on_permissions_added(&granted).await.unwrap();
    assert!(matches!(out, GrantOutcome::Stale));
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Optimal);
    assert!(r.pending().peek().is_none());
}

#[tokio::test]
async fn unrelated_grant_consumes_token_without_effect() {
    let rig = Rig::booted(config()).await;
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 7, "https://example.com/", FilteringLevel::Optimal)
        .await
        .unwrap();
    let granted = strings(&["*://*.other.org/*"]);
    rig.host.set_origins(granted.clone());

    let out = rig.agent.on_permissions_added(&granted).await.unwrap();
    assert!(matches!(out, GrantOutcome::NotApplicable));
    assert!(r.pending().peek().is_none());
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Basic);
}

#[tokio::test]
async fn new_request_supersedes_pending_token() {
    let rig = Rig::booted(config()).await;
    let r = rig.agent.reconciler();

    let g1 = r
        .request_upgrade("a.com", 1, "https://a.com/", FilteringLevel::Optimal)
        .await
        .unwrap();
    let g2 = r
        .request_upgrade("b.com", 2, "https://b.com/", FilteringLevel::Complete)
        .await
        .unwrap();
    assert!(g2 > g1);

    let token = r.pending().peek().unwrap();
    assert_eq!(token.hostname, "b.com");
    assert_eq!(token.issued_at_level, FilteringLevel::Basic);
}

#[tokio::test]
async fn broad_default_makes_upgrade_immaterial() {
    let host = std::sync::Arc::new(shieldline_agent::host::memory::MemoryHost::demo(3));
    host.set_origins(["<all_urls>"]);
    let rig = Rig::with_host(config(), host);
    assert!(rig.agent.boot().await.is_ready());
    let r = rig.agent.reconciler();
    assert_eq!(r.get_default_level().await, FilteringLevel::Complete);

    r.request_upgrade("example.com", 7, "https://example.com/", FilteringLevel::Optimal)
        .await
        .unwrap();
    let out = rig.agent.on_permissions_added(&strings(&["<all_urls>"])).await.unwrap();
    assert!(matches!(out, GrantOutcome::NotApplicable));
}

#[tokio::test]
async fn upgrade_without_auto_reload_schedules_nothing() {
    let rig = Rig::booted(config()).await;
    rig.agent
        .store()
        .update(|cfg| cfg.auto_reload = false)
        .await
        .unwrap();
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 7, "https://example.com/", FilteringLevel::Optimal)
        .await
        .unwrap();
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());

    let out = rig.agent.on_permissions_added(&granted).await.unwrap();
    assert!(matches!(out, GrantOutcome::Upgraded { reload: None, .. }));
    assert_eq!(r.get_level("example.com").await.unwrap(), FilteringLevel::Optimal);
}

#[tokio::test]
async fn reload_of_closed_tab_fails_silently() {
    let rig = Rig::booted(config()).await;
    let r = rig.agent.reconciler();

    r.request_upgrade("example.com", 9, "https://example.com/", FilteringLevel::Complete)
        .await
        .unwrap();
    let granted = strings(&["*://*.example.com/*"]);
    rig.host.set_origins(granted.clone());

    let GrantOutcome::Upgraded { reload: Some(reload), .. } = rig.agent.on_permissions_added(&granted).await.unwrap() else {
        panic!("expected an upgrade with a scheduled reload");
    };
    reload.await.unwrap();
    assert!(rig.host.navigations().is_empty());
}

#[tokio::test]
async fn concurrent_set_and_revoke_keep_invariant() {
    let rig = Rig::booted(config()).await;
    rig.host.set_origins(["*://*.a.com/*", "*://*.b.com/*"]);
    let r = rig.agent.reconciler();
    r.set_level("a.com", FilteringLevel::Complete).await.unwrap();

    rig.host.set_origins(Vec::<String>::new());
    let (set, revoked) = tokio::join!(
        r.set_level("b.com", FilteringLevel::Complete),
        rig.agent.on_permissions_removed()
    );
    set.unwrap();
    revoked.unwrap();
    assert_levels_within_grants(&rig).await;
}

#[tokio::test]
async fn passive_grant_refreshes_when_levels_change() {
    let rig = Rig::booted(config()).await;
    // A stored level the grants do not back, e.g. from an older build.
    rig.agent
        .store()
        .update(|cfg| {
            cfg.per_host_level.insert("example.com".into(), FilteringLevel::Complete);
        })
        .await
        .unwrap();
    let before = rig.host.session_refreshes().len();

    let out = rig.agent.on_permissions_added(&strings(&["*://*.other.org/*"])).await.unwrap();
    assert!(matches!(out, GrantOutcome::Resynced { changed: true }));
    assert_eq!(rig.host.session_refreshes().len(), before + 1);
    assert_levels_within_grants(&rig).await;

    let grants = GrantSet::from_origins(&["*://*.other.org/*"]);
    assert!(!grants.covers("example.com"));
}
