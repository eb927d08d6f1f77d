//! Persistence layer.
//!
//! - `KeyValueStore`: async key/value primitive provided by the host.
//! - `ConfigStore`: single read-modify-write owner of the policy blob.

mod kv;
mod policy;

pub use kv::{KeyValueStore, MemoryKv};
pub use policy::{ConfigStore, ConfigTxn, PolicyConfig, POLICY_KEY, SCHEMA_VERSION};
