//! Key-value backends for the credential store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Minimal key-value contract the credential store is built on
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Upsert a value
    async fn put(&self, key: &str, value: String) -> anyhow::Result<()>;

    /// Every key currently held, in no particular order
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
}

/// Process-local backend
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the raw entries
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> anyhow::Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_overwrites_and_keys_lists_everything() {
        let backend = InMemoryBackend::new();
        backend.put("alice", "one".to_string()).await.unwrap();
        backend.put("alice", "two".to_string()).await.unwrap();
        backend.put("lookup/email/abc", "alice".to_string()).await.unwrap();

        assert_eq!(backend.get("alice").await.unwrap().as_deref(), Some("two"));
        assert_eq!(backend.get("bob").await.unwrap(), None);

        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alice", "lookup/email/abc"]);
    }
}
