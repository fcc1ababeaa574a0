//! # Runtime Configuration
//!
//! The Authelia side of the sync: the users database document, the secret
//! holding plaintext credentials, and the restart signal that makes the
//! daemon pick both up.
//!
//! No transaction spans the three resources. Callers write the document
//! first, then the secrets, then trigger the restart.

pub mod document;
pub mod kubernetes;

pub use document::{parse_users_document, render_users_document};
pub use kubernetes::KubernetesOrigin;

use crate::error::SyncResult;
use crate::model::ConfigRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use zeroize::Zeroizing;

/// Plaintext credentials to merge into the secret, keyed by identity
pub type SecretBatch = BTreeMap<String, Zeroizing<Vec<u8>>>;

/// Runtime configuration consumed by the Authelia daemon
#[async_trait]
pub trait RuntimeConfig: Send + Sync {
    /// Read the users database; an absent document yields an empty map
    async fn load_users_origin(&self) -> SyncResult<BTreeMap<String, ConfigRecord>>;

    /// Replace the users database in place (last writer wins)
    async fn update_origin(&self, document: Vec<u8>) -> SyncResult<()>;

    /// Merge entries into the secret; entries not in `changed` are kept
    async fn update_secrets(&self, changed: &SecretBatch) -> SyncResult<()>;

    /// Ask the orchestrator to roll the daemon; does not wait for it
    async fn restart_origin(&self) -> SyncResult<()>;
}
