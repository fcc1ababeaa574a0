//! # Reconciler
//!
//! Keeps the credential store and Authelia's runtime configuration in sync.
//!
//! ## Sync Flow
//!
//! 1. **Load** - list the store and read the users database concurrently;
//!    either failing aborts the pass
//! 2. **Compare** - assign one [`SyncAction`] per identity in the union of both sides
//! 3. **Apply** - per identity, independently; failures are collected, not fatal
//!    - `StorageCreate`: mirror the Authelia entry into the store as-is
//!    - `ConfigCreate` / `ConfigUpdate`: mint a new credential pair, store the
//!      new hash, stage the plaintext for the Secret
//! 4. **Publish** - only when a credential was staged: users database, then
//!    Secret, then restart. Each step runs only if the previous one succeeded.
//!
//! A `ConfigUpdate` caused by an email change alone still rotates the
//! credential, since the store never holds plaintext.
//!
//! Identities missing from one side are never deleted from the other.

use crate::credential::CredentialSource;
use crate::error::{ApplyFailure, SyncError, SyncResult};
use crate::metrics;
use crate::model::{ConfigRecord, StoredRecord, SyncAction};
use crate::origin::{render_users_document, RuntimeConfig, SecretBatch};
use crate::store::CredentialStore;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

/// Outcome of a successful sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Action assigned to every identity seen on either side
    pub actions: BTreeMap<String, SyncAction>,
    /// Identities that received a new credential
    pub rotated: Vec<String>,
    /// Whether the users database, Secret and restart were pushed
    pub published: bool,
}

impl SyncReport {
    /// Number of identities assigned `action`
    #[must_use]
    pub fn count(&self, action: SyncAction) -> usize {
        self.actions.values().filter(|a| **a == action).count()
    }
}

/// Assign one action per identity present in `storage` or `origin`
///
/// The store is authoritative for email; credential hashes are only compared
/// for equality.
pub fn compare(
    storage: &BTreeMap<String, StoredRecord>,
    origin: &BTreeMap<String, ConfigRecord>,
) -> BTreeMap<String, SyncAction> {
    let mut actions = BTreeMap::new();

    for (identity, stored) in storage {
        let action = match origin.get(identity) {
            None => SyncAction::ConfigCreate,
            Some(configured)
                if stored.credential_hash != configured.credential_hash
                    || stored.email != configured.email =>
            {
                SyncAction::ConfigUpdate
            }
            Some(_) => SyncAction::NoAction,
        };
        actions.insert(identity.clone(), action);
    }

    for identity in origin.keys() {
        actions
            .entry(identity.clone())
            .or_insert(SyncAction::StorageCreate);
    }

    actions
}

/// Record for an identity as the store should see it after this pass
///
/// Store values win; empty store fields are filled from the users database.
fn merged_record(
    stored: Option<&StoredRecord>,
    configured: Option<&ConfigRecord>,
) -> Option<StoredRecord> {
    match (stored, configured) {
        (Some(stored), Some(configured)) => {
            let mut record = stored.clone();
            record.fill_missing_from(configured);
            Some(record)
        }
        (Some(stored), None) => Some(stored.clone()),
        (None, Some(configured)) => Some(StoredRecord::from_config(configured)),
        (None, None) => None,
    }
}

/// Document entry for a store record, keeping the unmodelled keys Authelia already had
fn document_entry(record: &StoredRecord, configured: Option<&ConfigRecord>) -> ConfigRecord {
    let mut entry = record.to_config();
    if let Some(configured) = configured {
        entry.extra.clone_from(&configured.extra);
    }
    entry
}

/// Result of the apply phase, input of the publish phase
#[derive(Default)]
struct Applied {
    /// Every identity that will appear in the published users database
    document: BTreeMap<String, ConfigRecord>,
    secrets: SecretBatch,
    rotated: Vec<String>,
    failures: Vec<ApplyFailure>,
}

pub struct Reconciler {
    store: Arc<dyn CredentialStore>,
    origin: Arc<dyn RuntimeConfig>,
    credentials: Arc<dyn CredentialSource>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        origin: Arc<dyn RuntimeConfig>,
        credentials: Arc<dyn CredentialSource>,
    ) -> Self {
        Self {
            store,
            origin,
            credentials,
        }
    }

    /// Run one full sync pass
    ///
    /// Returns [`SyncError::Apply`] when some identities failed but the rest
    /// (and the publish, if any) went through.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        let start = Instant::now();
        metrics::increment_sync_runs();

        let result = self.run_pass().await;

        metrics::observe_sync_duration(start.elapsed().as_secs_f64());
        match &result {
            Ok(report) => info!(
                "Sync complete: {} identities, {} rotated, published={}",
                report.actions.len(),
                report.rotated.len(),
                report.published
            ),
            Err(e) => {
                metrics::increment_sync_errors();
                error!("Sync failed: {}", e);
            }
        }
        result
    }

    /// Run a sync pass unless `shutdown` resolves first
    ///
    /// Writes already issued when the pass is abandoned stay committed; the
    /// next pass converges from whatever state they left.
    pub async fn sync_until<F>(&self, shutdown: F) -> SyncResult<SyncReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.sync() => result,
            () = shutdown => {
                warn!("Sync pass cancelled before completion");
                metrics::increment_sync_errors();
                Err(SyncError::Cancelled)
            }
        }
    }

    async fn run_pass(&self) -> SyncResult<SyncReport> {
        let (storage, origin) = self.load().await?;

        let actions = compare(&storage, &origin);
        for (identity, action) in &actions {
            debug!("{}: {}", identity, action);
            metrics::increment_action(action.as_str());
        }

        let applied = self.apply(&actions, &storage, &origin).await;
        let published = self.publish(&applied).await?;

        if !applied.failures.is_empty() {
            warn!(
                "{} of {} identities failed to apply",
                applied.failures.len(),
                actions.len()
            );
            return Err(SyncError::Apply(applied.failures));
        }

        Ok(SyncReport {
            actions,
            rotated: applied.rotated,
            published,
        })
    }

    /// Read both sides concurrently (two tasks, joined before comparing)
    async fn load(
        &self,
    ) -> SyncResult<(BTreeMap<String, StoredRecord>, BTreeMap<String, ConfigRecord>)> {
        let (storage, origin) =
            tokio::try_join!(self.store.list(), self.origin.load_users_origin())?;
        info!(
            "Loaded {} stored records and {} Authelia users",
            storage.len(),
            origin.len()
        );
        Ok((storage, origin))
    }

    async fn apply(
        &self,
        actions: &BTreeMap<String, SyncAction>,
        storage: &BTreeMap<String, StoredRecord>,
        origin: &BTreeMap<String, ConfigRecord>,
    ) -> Applied {
        let mut applied = Applied::default();

        for (identity, action) in actions {
            let configured = origin.get(identity);
            let Some(record) = merged_record(storage.get(identity), configured) else {
                continue;
            };

            match action {
                SyncAction::NoAction => {
                    applied
                        .document
                        .insert(identity.clone(), document_entry(&record, configured));
                }
                SyncAction::StorageCreate => {
                    match self.store.set(record).await {
                        Ok(_) => info!("Mirrored Authelia user {} into credential store", identity),
                        Err(e) => {
                            error!("Failed to mirror {} into credential store: {}", identity, e);
                            applied.failures.push(ApplyFailure {
                                identity: identity.clone(),
                                error: e,
                            });
                        }
                    }
                    // Authelia already serves this entry unchanged.
                    if let Some(configured) = configured {
                        applied.document.insert(identity.clone(), configured.clone());
                    }
                }
                SyncAction::ConfigCreate | SyncAction::ConfigUpdate => {
                    match self.rotate(record).await {
                        Ok((written, plaintext)) => {
                            info!("Rotated credential for {} ({})", identity, action);
                            applied
                                .document
                                .insert(identity.clone(), document_entry(&written, configured));
                            applied.secrets.insert(identity.clone(), plaintext);
                            applied.rotated.push(identity.clone());
                        }
                        Err(e) => {
                            error!("Failed to rotate credential for {}: {}", identity, e);
                            // Previous entry only; no hash goes out without its plaintext.
                            if let Some(configured) = configured {
                                applied.document.insert(identity.clone(), configured.clone());
                            }
                            applied.failures.push(ApplyFailure {
                                identity: identity.clone(),
                                error: e,
                            });
                        }
                    }
                }
            }
        }

        metrics::increment_credentials_rotated(applied.rotated.len());
        applied
    }

    /// Mint a credential pair, store its hash, and hand back the plaintext
    async fn rotate(
        &self,
        mut record: StoredRecord,
    ) -> SyncResult<(StoredRecord, Zeroizing<Vec<u8>>)> {
        let credentials = Arc::clone(&self.credentials);
        // Argon2 is CPU-bound; the pass still waits for it before moving on.
        let pair = tokio::task::spawn_blocking(move || credentials.generate())
            .await
            .map_err(|e| SyncError::RandomSourceExhausted(format!("credential task failed: {e}")))??;

        record.credential_hash.clone_from(&pair.hash);
        let written = self.store.set(record).await?;
        Ok((written, Zeroizing::new(pair.plaintext.as_bytes().to_vec())))
    }

    /// Push document, secrets and restart, in that order; returns whether anything was pushed
    async fn publish(&self, applied: &Applied) -> SyncResult<bool> {
        if applied.secrets.is_empty() {
            info!("Authelia configuration already up to date, nothing to publish");
            return Ok(false);
        }

        let document = render_users_document(&applied.document)?;
        self.origin.update_origin(document).await?;
        self.origin.update_secrets(&applied.secrets).await?;
        self.origin.restart_origin().await?;

        metrics::increment_publishes();
        info!(
            "Published {} users ({} new credentials) and restarted Authelia",
            applied.document.len(),
            applied.secrets.len()
        );
        Ok(true)
    }
}
