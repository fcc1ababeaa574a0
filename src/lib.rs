//! # Authelia Sync
//!
//! Keeps Authelia's file-based users database, running in Kubernetes, in line
//! with a canonical key-value credential store.
//!
//! ## Overview
//!
//! 1. **Credential store** - canonical user records in Redis (or memory), keyed
//!    by identity, with email lookup entries
//! 2. **Runtime configuration** - Authelia's users database ConfigMap, the
//!    Secret holding plaintext credentials, and the workload restart
//! 3. **Reconciler** - diffs both sides, mints credentials where Authelia needs
//!    a new hash, and publishes document, secrets and restart in that order
//!
//! The binary runs one pass at startup (`serve`) or on demand (`sync`) and
//! exposes Prometheus metrics and health checks.

pub mod config;
pub mod constants;
pub mod credential;
pub mod error;
pub mod metrics;
pub mod model;
pub mod origin;
pub mod reconciler;
pub mod server;
pub mod store;

pub use config::SyncConfig;
pub use credential::{CredentialGenerator, CredentialPair, CredentialSource, HashPolicy};
pub use error::{ApplyFailure, SyncError, SyncResult};
pub use model::{ConfigRecord, ProfileMetadata, StoredRecord, SyncAction};
pub use origin::{KubernetesOrigin, RuntimeConfig, SecretBatch};
pub use reconciler::{compare, Reconciler, SyncReport};
pub use store::{CredentialStore, InMemoryBackend, KeyValueBackend, KvCredentialStore, RedisBackend};
