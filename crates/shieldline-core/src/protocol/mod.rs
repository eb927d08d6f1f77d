//! Message protocol between UI/content contexts and the agent.
//!
//! - Requests: JSON objects discriminated by `what`.
//! - Replies: a typed [`reply::Response`] or an error payload.
//! - Deltas: state changes broadcast to every listening context.

pub mod reply;
pub mod request;

pub use reply::{
    reply_json, EnabledRuleSets, ErrorPayload, OptionsData, PopupData, Reply, Response, RuleSetDetails, StateDelta,
};
pub use request::{LevelDetails, MessageSender, Request, Tier};
