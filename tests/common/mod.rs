//! Shared fakes for reconciler integration tests
//!
//! - [`FakeRuntimeConfig`] records every adapter call, keeps the published
//!   document and a merge-only secret map, and can be told to fail a step.
//! - [`FlakyStore`] wraps a real in-memory store and refuses writes for chosen identities.
//! - [`FailingCredentials`] stops producing credentials after a number of pairs.

#![allow(dead_code, reason = "not every test file uses every helper")]

use anyhow::anyhow;
use async_trait::async_trait;
use authelia_sync::origin::parse_users_document;
use authelia_sync::{
    ConfigRecord, CredentialGenerator, CredentialPair, CredentialSource, CredentialStore,
    HashPolicy, InMemoryBackend, KeyValueBackend, KvCredentialStore, Reconciler, RuntimeConfig,
    SecretBatch, StoredRecord, SyncError, SyncResult,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Argon2 parameters cheap enough for tests
pub fn cheap_policy() -> HashPolicy {
    HashPolicy {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    }
}

pub fn generator() -> Arc<CredentialGenerator> {
    Arc::new(CredentialGenerator::new(24, cheap_policy()).unwrap())
}

pub fn config_record(identity: &str, hash: &str, email: &str) -> ConfigRecord {
    ConfigRecord {
        identity: identity.to_string(),
        credential_hash: hash.to_string(),
        email: email.to_string(),
        ..Default::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load,
    UpdateOrigin,
    UpdateSecrets(Vec<String>),
    Restart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Load,
    UpdateOrigin,
    UpdateSecrets,
    Restart,
}

#[derive(Debug, Default)]
struct OriginState {
    users: BTreeMap<String, ConfigRecord>,
    secrets: BTreeMap<String, Vec<u8>>,
    calls: Vec<Call>,
}

/// In-memory Authelia side
#[derive(Debug, Default)]
pub struct FakeRuntimeConfig {
    state: Mutex<OriginState>,
    fail_at: Mutex<Option<FailPoint>>,
    stall_load: bool,
}

impl FakeRuntimeConfig {
    pub fn with_users(users: impl IntoIterator<Item = ConfigRecord>) -> Self {
        let fake = Self::default();
        fake.state.lock().unwrap().users = users
            .into_iter()
            .map(|record| (record.identity.clone(), record))
            .collect();
        fake
    }

    /// A fake whose load never completes
    pub fn stalled() -> Self {
        Self {
            stall_load: true,
            ..Self::default()
        }
    }

    pub fn fail_at(&self, point: FailPoint) {
        *self.fail_at.lock().unwrap() = Some(point);
    }

    pub fn seed_secret(&self, identity: &str, plaintext: &str) {
        self.state
            .lock()
            .unwrap()
            .secrets
            .insert(identity.to_string(), plaintext.as_bytes().to_vec());
    }

    pub fn users(&self) -> BTreeMap<String, ConfigRecord> {
        self.state.lock().unwrap().users.clone()
    }

    pub fn secret(&self, identity: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .secrets
            .get(identity)
            .map(|bytes| String::from_utf8(bytes.clone()).unwrap())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls other than loads
    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| *c != Call::Load).collect()
    }

    fn check(&self, point: FailPoint) -> SyncResult<()> {
        if *self.fail_at.lock().unwrap() == Some(point) {
            return Err(SyncError::Backend(anyhow!("injected {point:?} failure")));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl RuntimeConfig for FakeRuntimeConfig {
    async fn load_users_origin(&self) -> SyncResult<BTreeMap<String, ConfigRecord>> {
        if self.stall_load {
            std::future::pending::<()>().await;
        }
        self.record(Call::Load);
        self.check(FailPoint::Load)?;
        Ok(self.users())
    }

    async fn update_origin(&self, document: Vec<u8>) -> SyncResult<()> {
        self.record(Call::UpdateOrigin);
        self.check(FailPoint::UpdateOrigin)?;
        let users = parse_users_document(std::str::from_utf8(&document).unwrap())?;
        self.state.lock().unwrap().users = users;
        Ok(())
    }

    async fn update_secrets(&self, changed: &SecretBatch) -> SyncResult<()> {
        self.record(Call::UpdateSecrets(changed.keys().cloned().collect()));
        self.check(FailPoint::UpdateSecrets)?;
        let mut state = self.state.lock().unwrap();
        for (identity, plaintext) in changed {
            state.secrets.insert(identity.clone(), plaintext.to_vec());
        }
        Ok(())
    }

    async fn restart_origin(&self) -> SyncResult<()> {
        self.record(Call::Restart);
        self.check(FailPoint::Restart)
    }
}

/// Real store over an in-memory backend that rejects writes for some identities
#[derive(Debug)]
pub struct FlakyStore {
    pub backend: Arc<InMemoryBackend>,
    inner: KvCredentialStore,
    reject: BTreeSet<String>,
    fail_list: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::rejecting(&[])
    }

    pub fn rejecting(identities: &[&str]) -> Self {
        let backend = Arc::new(InMemoryBackend::new());
        let inner = KvCredentialStore::new(Arc::clone(&backend) as Arc<dyn KeyValueBackend>);
        Self {
            backend,
            inner,
            reject: identities.iter().map(ToString::to_string).collect(),
            fail_list: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `list` fail
    pub fn fail_list(&self) {
        self.fail_list.store(true, Ordering::SeqCst);
    }

    /// Write through the real store, bypassing the rejection list
    pub async fn seed(&self, record: StoredRecord) -> StoredRecord {
        self.inner.set(record).await.unwrap()
    }

    pub async fn record(&self, identity: &str) -> StoredRecord {
        self.inner.get(identity).await.unwrap()
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn get(&self, identity: &str) -> SyncResult<StoredRecord> {
        self.inner.get(identity).await
    }

    async fn list(&self) -> SyncResult<BTreeMap<String, StoredRecord>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(SyncError::Backend(anyhow!("injected list failure")));
        }
        self.inner.list().await
    }

    async fn set(&self, record: StoredRecord) -> SyncResult<StoredRecord> {
        if self.reject.contains(&record.identity) {
            return Err(SyncError::Backend(anyhow!(
                "injected write failure for {}",
                record.identity
            )));
        }
        self.inner.set(record).await
    }
}

/// Credential source that runs dry after `remaining` pairs
#[derive(Debug)]
pub struct FailingCredentials {
    remaining: AtomicUsize,
    inner: Arc<CredentialGenerator>,
}

impl FailingCredentials {
    pub fn after(remaining: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(remaining),
            inner: generator(),
        }
    }
}

impl CredentialSource for FailingCredentials {
    fn generate(&self) -> SyncResult<CredentialPair> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(SyncError::RandomSourceExhausted(
                "entropy source unavailable".to_string(),
            ));
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        self.inner.generate()
    }
}

pub fn reconciler(
    store: &Arc<FlakyStore>,
    origin: &Arc<FakeRuntimeConfig>,
    credentials: Arc<dyn CredentialSource>,
) -> Reconciler {
    Reconciler::new(
        Arc::clone(store) as Arc<dyn CredentialStore>,
        Arc::clone(origin) as Arc<dyn RuntimeConfig>,
        credentials,
    )
}
