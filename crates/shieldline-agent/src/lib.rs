//! shieldline agent runtime.
//!
//! Boots the filtering agent, keeps the persisted policy consistent with
//! permission grants and the host rule engine, and routes UI/content
//! requests into it. Host facilities (storage, permissions, rule engine,
//! scripting, tabs) are reached only through the traits in [`host`].

pub mod app_state;
pub mod config;
pub mod dispatch;
pub mod guard;
pub mod host;
pub mod obs;
pub mod policy;
pub mod rules;
pub mod scripting;
pub mod session;
pub mod store;

pub use app_state::Agent;
