//! Durable storage behind the event store.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Keyed append + lookup storage. Payloads are opaque JSON.
#[async_trait]
pub trait FactBacking: Send + Sync {
    async fn append(&self, key: &str, payload: serde_json::Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

/// Process-local backing. Used by default and in tests.
#[derive(Default)]
pub struct MemoryBacking {
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl FactBacking for MemoryBacking {
    async fn append(&self, key: &str, payload: serde_json::Value) -> Result<()> {
        self.records.write().await.insert(key.to_string(), payload);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_returns_what_was_appended() {
        let backing = MemoryBacking::new();
        backing.append("id:1", json!({"a": 1})).await.unwrap();

        assert_eq!(backing.get("id:1").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(backing.get("id:2").await.unwrap(), None);
        assert_eq!(backing.len().await, 1);
    }
}
