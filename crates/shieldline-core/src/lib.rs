//! shieldline core: policy primitives, error types, and the message protocol.
//!
//! This crate defines the data model and wire contracts shared by the agent
//! runtime and any UI tooling talking to it. It carries no runtime or host
//! dependencies so the same types can be used on both sides of the message
//! channel.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here
//! (`#![deny(clippy::panic, clippy::unwrap_used, clippy::expect_used)]`).
//! All fallible paths must surface as `ShieldError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod grants;
pub mod level;
pub mod protocol;
pub mod version;

/// Shared result type.
pub use error::{Result, ShieldError};
pub use level::FilteringLevel;
