//! Static rule-set lifecycle and rule refresh decisions.

mod lifecycle;

pub use lifecycle::{Activation, RuleLifecycle, RuleRefresh, DEFAULT_RULE_SETS_KEY};
