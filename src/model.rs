//! # Record Types
//!
//! The two representations of a user that the reconciler keeps consistent:
//!
//! - [`StoredRecord`] - canonical record held in the credential store
//! - [`ConfigRecord`] - entry of the Authelia users database document
//!
//! Both are keyed by a normalized identity (see [`normalize_identity`]).

use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalize a username into an identity key (trimmed, lower-cased)
pub fn normalize_identity(raw: &str) -> SyncResult<String> {
    let identity = raw.trim().to_lowercase();
    if identity.is_empty() {
        return Err(SyncError::validation("identity must not be empty"));
    }
    Ok(identity)
}

/// Optional profile attributes carried alongside a user
///
/// Known attributes have dedicated fields; anything else lands in `extra`
/// so that a round trip through the flattened map is lossless.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileMetadata {
    pub picture: Option<String>,
    pub locale: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub job_title: Option<String>,
    pub organization: Option<String>,
    pub street_address: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub phone_number: Option<String>,
    pub shirt_size: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ProfileMetadata {
    fn fields(&self) -> [(&'static str, &Option<String>); 13] {
        [
            ("picture", &self.picture),
            ("locale", &self.locale),
            ("given_name", &self.given_name),
            ("family_name", &self.family_name),
            ("job_title", &self.job_title),
            ("organization", &self.organization),
            ("street_address", &self.street_address),
            ("locality", &self.locality),
            ("region", &self.region),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
            ("phone_number", &self.phone_number),
            ("shirt_size", &self.shirt_size),
        ]
    }

    fn field_mut(&mut self, key: &str) -> Option<&mut Option<String>> {
        let slot = match key {
            "picture" => &mut self.picture,
            "locale" => &mut self.locale,
            "given_name" => &mut self.given_name,
            "family_name" => &mut self.family_name,
            "job_title" => &mut self.job_title,
            "organization" => &mut self.organization,
            "street_address" => &mut self.street_address,
            "locality" => &mut self.locality,
            "region" => &mut self.region,
            "postal_code" => &mut self.postal_code,
            "country" => &mut self.country,
            "phone_number" => &mut self.phone_number,
            "shirt_size" => &mut self.shirt_size,
            _ => return None,
        };
        Some(slot)
    }

    /// Flatten into the string map used by the users database (empty values dropped)
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map: BTreeMap<String, String> = self
            .extra
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in self.fields() {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                map.insert(key.to_string(), value.to_string());
            }
        }
        map
    }

    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        let mut metadata = Self::default();
        for (key, value) in map {
            if value.is_empty() {
                continue;
            }
            match metadata.field_mut(key) {
                Some(slot) => *slot = Some(value.clone()),
                None => {
                    metadata.extra.insert(key.clone(), value.clone());
                }
            }
        }
        metadata
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_map().is_empty()
    }

    /// Fill every empty attribute from `other`, keeping the values already set
    pub fn fill_missing(&mut self, other: &BTreeMap<String, String>) {
        let current = self.to_map();
        for (key, value) in other {
            if value.is_empty() || current.contains_key(key) {
                continue;
            }
            match self.field_mut(key) {
                Some(slot) => *slot = Some(value.clone()),
                None => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Canonical user record held in the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub identity: String,
    pub credential_hash: String,
    pub email: String,
    pub display_name: String,
    #[serde(default)]
    pub profile_metadata: ProfileMetadata,
    /// Set on the first write, never changed afterwards
    pub created_at: Option<DateTime<Utc>>,
    /// Refreshed on every write
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    pub fn new(identity: impl Into<String>, credential_hash: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            credential_hash: credential_hash.into(),
            email: String::new(),
            display_name: String::new(),
            profile_metadata: ProfileMetadata::default(),
            created_at: None,
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    /// Mirror a users database entry as a store record, unchanged
    pub fn from_config(record: &ConfigRecord) -> Self {
        Self {
            identity: record.identity.clone(),
            credential_hash: record.credential_hash.clone(),
            email: record.email.clone(),
            display_name: record.display_name.clone(),
            profile_metadata: ProfileMetadata::from_map(&record.profile_metadata),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn to_config(&self) -> ConfigRecord {
        ConfigRecord {
            identity: self.identity.clone(),
            credential_hash: self.credential_hash.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            profile_metadata: self.profile_metadata.to_map(),
            extra: serde_yaml::Mapping::new(),
        }
    }

    /// Take the configuration side's value for every field left empty here
    ///
    /// The store stays authoritative for anything it already holds.
    pub fn fill_missing_from(&mut self, origin: &ConfigRecord) {
        if self.email.is_empty() {
            self.email.clone_from(&origin.email);
        }
        if self.display_name.is_empty() {
            self.display_name.clone_from(&origin.display_name);
        }
        self.profile_metadata.fill_missing(&origin.profile_metadata);
    }
}

/// Entry of the users database consumed by Authelia
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRecord {
    pub identity: String,
    pub credential_hash: String,
    pub email: String,
    pub display_name: String,
    pub profile_metadata: BTreeMap<String, String>,
    /// Per-user keys this crate does not model (`groups`, ...), kept verbatim
    pub extra: serde_yaml::Mapping,
}

/// What a sync pass decided to do for one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    /// Both sides agree on credential hash and email
    NoAction,
    /// Only Authelia knows the identity; mirror it into the store
    StorageCreate,
    /// Only the store knows the identity; publish it to Authelia
    ConfigCreate,
    /// Both know it but hash or email differ; republish from the store
    ConfigUpdate,
}

impl SyncAction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::NoAction => "no-action",
            SyncAction::StorageCreate => "storage-create",
            SyncAction::ConfigCreate => "config-create",
            SyncAction::ConfigUpdate => "config-update",
        }
    }

    /// Whether this action rotates the credential and republishes the document
    #[must_use]
    pub fn requires_publish(&self) -> bool {
        matches!(self, SyncAction::ConfigCreate | SyncAction::ConfigUpdate)
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
