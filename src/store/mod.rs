//! # Credential Store
//!
//! Canonical user records kept in a key-value backend.
//!
//! Layout:
//! - `<identity>` - JSON-encoded [`StoredRecord`]
//! - `lookup/<namespace>/<sha256-hex>` - identity owning a normalized attribute
//!
//! The store is polymorphic over the backend ([`KeyValueBackend`]) and is
//! itself consumed by the reconciler through the [`CredentialStore`] trait.

pub mod backend;
pub mod lookup;
pub mod redis;

pub use backend::{InMemoryBackend, KeyValueBackend};
pub use lookup::{build_lookup_key, is_lookup_key, lookup_digest};
pub use redis::RedisBackend;

use crate::constants::EMAIL_LOOKUP_NAMESPACE;
use crate::error::{SyncError, SyncResult};
use crate::model::{normalize_identity, StoredRecord};
use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store of canonical user records
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch a record by identity or by lookup key
    async fn get(&self, identity: &str) -> SyncResult<StoredRecord>;

    /// Every primary record, keyed by identity; lookup entries are skipped
    async fn list(&self) -> SyncResult<BTreeMap<String, StoredRecord>>;

    /// Upsert a record (and its email lookup entry) and return it as written
    async fn set(&self, record: StoredRecord) -> SyncResult<StoredRecord>;

    /// Resolve a record through its normalized email
    async fn get_by_email(&self, email: &str) -> SyncResult<StoredRecord> {
        if email.trim().is_empty() {
            return Err(SyncError::validation("email must not be empty"));
        }
        self.get(&build_lookup_key(EMAIL_LOOKUP_NAMESPACE, &lookup_digest(email)))
            .await
    }
}

/// [`CredentialStore`] over any [`KeyValueBackend`]
#[derive(Clone)]
pub struct KvCredentialStore {
    backend: Arc<dyn KeyValueBackend>,
}

impl std::fmt::Debug for KvCredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvCredentialStore").finish_non_exhaustive()
    }
}

impl KvCredentialStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self { backend }
    }

    async fn read_primary(&self, identity: &str) -> SyncResult<Option<StoredRecord>> {
        let Some(raw) = self.backend.get(identity).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw)
            .with_context(|| format!("Corrupt credential record for '{identity}'"))?;
        Ok(Some(record))
    }
}

#[async_trait]
impl CredentialStore for KvCredentialStore {
    async fn get(&self, identity: &str) -> SyncResult<StoredRecord> {
        let identity = if is_lookup_key(identity) {
            let target = self
                .backend
                .get(identity)
                .await?
                .ok_or_else(|| SyncError::not_found("lookup entry", identity))?;
            debug!("Resolved lookup key {} to identity {}", identity, target);
            target
        } else {
            normalize_identity(identity)?
        };

        self.read_primary(&identity)
            .await?
            .ok_or_else(|| SyncError::not_found("user", identity))
    }

    async fn list(&self) -> SyncResult<BTreeMap<String, StoredRecord>> {
        let mut keys: Vec<String> = self
            .backend
            .keys()
            .await?
            .into_iter()
            .filter(|key| !is_lookup_key(key))
            .collect();
        keys.sort();

        // Value: (record, loaded from the normalized key itself)
        let mut loaded: BTreeMap<String, (StoredRecord, bool)> = BTreeMap::new();
        for key in keys {
            // A key may vanish between the listing and the read.
            let Some(mut record) = self.read_primary(&key).await? else {
                continue;
            };
            let identity = normalize_identity(&key)?;
            let canonical = key == identity;

            // `set` only ever writes the normalized key, so it holds the latest state.
            if let Some((_, held_canonical)) = loaded.get(&identity) {
                if *held_canonical || !canonical {
                    warn!("Ignoring store key '{}': identity '{}' already loaded", key, identity);
                    continue;
                }
                warn!("Store key '{}' supersedes a legacy key for the same identity", key);
            }
            record.identity.clone_from(&identity);
            loaded.insert(identity, (record, canonical));
        }

        let records: BTreeMap<String, StoredRecord> = loaded
            .into_iter()
            .map(|(identity, (record, _))| (identity, record))
            .collect();

        debug!("Loaded {} records from credential store", records.len());
        Ok(records)
    }

    async fn set(&self, mut record: StoredRecord) -> SyncResult<StoredRecord> {
        record.identity = normalize_identity(&record.identity)?;
        let now = Utc::now();
        record.created_at.get_or_insert(now);
        record.updated_at = Some(now);

        let encoded = serde_json::to_string(&record)
            .with_context(|| format!("Failed to encode record for '{}'", record.identity))?;
        self.backend
            .put(&record.identity, encoded)
            .await
            .with_context(|| format!("Failed to write record for '{}'", record.identity))?;

        // No transaction spans both writes: a failed index write fails the whole set.
        if !record.email.trim().is_empty() {
            let key = build_lookup_key(EMAIL_LOOKUP_NAMESPACE, &lookup_digest(&record.email));
            self.backend
                .put(&key, record.identity.clone())
                .await
                .with_context(|| format!("Failed to write email lookup for '{}'", record.identity))?;
        }

        debug!("Stored credential record for {}", record.identity);
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<InMemoryBackend>, KvCredentialStore) {
        let backend = Arc::new(InMemoryBackend::new());
        let store = KvCredentialStore::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);
        (backend, store)
    }

    #[tokio::test]
    async fn test_set_writes_record_and_email_lookup() {
        let (backend, store) = store();
        store
            .set(StoredRecord::new("Alice", "h1").with_email("Alice@Example.com"))
            .await
            .unwrap();

        let entries = backend.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert!(entries.contains_key("alice"));
        let lookup = build_lookup_key("email", &lookup_digest("alice@example.com"));
        assert_eq!(entries.get(&lookup).map(String::as_str), Some("alice"));
    }

    #[tokio::test]
    async fn test_set_without_email_skips_lookup() {
        let (backend, store) = store();
        store.set(StoredRecord::new("bob", "h1")).await.unwrap();
        assert_eq!(backend.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_timestamps_created_once_updated_always() {
        let (_, store) = store();
        let first = store.set(StoredRecord::new("alice", "h1")).await.unwrap();
        let created = first.created_at.unwrap();
        assert_eq!(first.updated_at, Some(created));

        let mut changed = first.clone();
        changed.credential_hash = "h2".to_string();
        let second = store.set(changed).await.unwrap();
        assert_eq!(second.created_at, Some(created));
        assert!(second.updated_at.unwrap() >= created);
    }

    #[tokio::test]
    async fn test_get_by_identity_and_by_email() {
        let (_, store) = store();
        store
            .set(StoredRecord::new("alice", "h1").with_email("a@x.com"))
            .await
            .unwrap();

        assert_eq!(store.get(" ALICE ").await.unwrap().credential_hash, "h1");
        assert_eq!(store.get_by_email("A@X.com").await.unwrap().identity, "alice");
        let via_key = build_lookup_key("email", &lookup_digest("a@x.com"));
        assert_eq!(store.get(&via_key).await.unwrap().identity, "alice");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found_and_empty_is_invalid() {
        let (_, store) = store();
        assert!(store.get("ghost").await.unwrap_err().is_not_found());
        assert!(store.get_by_email("ghost@x.com").await.unwrap_err().is_not_found());
        assert!(matches!(
            store.get("  ").await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_lookup_entries() {
        let (_, store) = store();
        store
            .set(StoredRecord::new("alice", "h1").with_email("a@x.com"))
            .await
            .unwrap();
        store
            .set(StoredRecord::new("bob", "h2").with_email("b@x.com"))
            .await
            .unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.keys().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(records["bob"].credential_hash, "h2");
    }

    #[tokio::test]
    async fn test_list_prefers_normalized_key_over_legacy_casing() {
        let (backend, store) = store();
        let legacy = serde_json::to_string(&StoredRecord::new("Alice", "stale")).unwrap();
        backend.put("Alice", legacy).await.unwrap();
        store.set(StoredRecord::new("alice", "fresh")).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["alice"].identity, "alice");
        assert_eq!(records["alice"].credential_hash, "fresh");
    }

    #[tokio::test]
    async fn test_list_loads_legacy_key_when_alone() {
        let (backend, store) = store();
        let legacy = serde_json::to_string(&StoredRecord::new("Alice", "h1")).unwrap();
        backend.put("Alice", legacy).await.unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records["alice"].credential_hash, "h1");
        assert_eq!(records["alice"].identity, "alice");
    }

    #[tokio::test]
    async fn test_corrupt_record_is_backend_error() {
        let (backend, store) = store();
        backend.put("alice", "{not json".to_string()).await.unwrap();
        assert!(matches!(store.get("alice").await, Err(SyncError::Backend(_))));
        assert!(matches!(store.list().await, Err(SyncError::Backend(_))));
    }
}
