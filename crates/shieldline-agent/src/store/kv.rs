use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use shieldline_core::error::{Result, ShieldError};

/// Durable (or session-scoped) key/value storage owned by the host.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>>;
    async fn write(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store. Counts writes and can be told to fail them.
#[derive(Default)]
pub struct MemoryKv {
    map: DashMap<String, Value>,
    writes: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.get(key).map(|v| v.value().clone())
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.map.insert(key.to_string(), value);
    }

    /// Drop everything, like a browser restart does to session storage.
    pub fn clear(&self) {
        self.map.clear();
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn read(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(ShieldError::Storage(format!("write refused: {key}")));
        }
        self.map.insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }
}
