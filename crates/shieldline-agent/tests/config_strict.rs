#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use shieldline_agent::config::{self, Flavor};

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
agent:
  version: "2025.1020.1200"
  origin: "chrome-extension://abc"
  reload_dealy_ms: 100 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let ok = r#"
version: 1
agent:
  version: "2025.1020.1200"
  origin: "Chrome-Extension://ABC/"
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.agent.flavor, Flavor::Chromium);
    assert_eq!(cfg.agent.reload_delay_ms, 437);
    assert_eq!(cfg.agent.strict_block_fix_threshold, "2025.804.2359");
    assert_eq!(cfg.engine.max_enabled_rule_sets, 50);
    assert_eq!(cfg.agent.normalized_origin(), "chrome-extension://abc");
}

#[test]
fn unsupported_schema_version() {
    let bad = r#"
version: 2
agent:
  version: "2025.1020.1200"
  origin: "chrome-extension://abc"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn malformed_build_version_rejected() {
    let bad = r#"
version: 1
agent:
  version: "1.2"
  origin: "chrome-extension://abc"
"#;
    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn out_of_range_values_rejected() {
    let delay = r#"
version: 1
agent:
  version: "2025.1020.1200"
  origin: "chrome-extension://abc"
  reload_delay_ms: 60000
"#;
    assert!(config::load_from_str(delay).is_err());

    let max = r#"
version: 1
agent:
  version: "2025.1020.1200"
  origin: "chrome-extension://abc"
engine:
  max_enabled_rule_sets: 0
"#;
    assert!(config::load_from_str(max).is_err());
}

#[test]
fn flavor_is_lowercase() {
    let ok = r#"
version: 1
agent:
  version: "2025.1020.1200"
  flavor: safari
  origin: "safari-web-extension://abc"
"#;
    assert_eq!(config::load_from_str(ok).unwrap().agent.flavor, Flavor::Safari);
}
