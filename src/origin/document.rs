//! # Users Database Document
//!
//! Codec for Authelia's file-based users database:
//!
//! ```yaml
//! users:
//!   alice:
//!     displayname: Alice
//!     password: $argon2id$v=19$m=65536,t=3,p=4$...
//!     email: alice@example.com
//!     groups: [admins]
//!     user_metadata:
//!       locale: en-GB
//! ```
//!
//! `user_metadata` is omitted when empty. Keys not listed above, such as
//! `groups`, are carried through a parse and render unchanged.

use crate::error::SyncResult;
use crate::model::{normalize_identity, ConfigRecord};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Default, Serialize, Deserialize)]
struct UsersDocument {
    #[serde(default)]
    users: Option<BTreeMap<String, DocumentUser>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentUser {
    #[serde(default)]
    displayname: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    email: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    user_metadata: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

/// Parse the users database into records keyed by normalized identity
///
/// An empty document is a valid, unconfigured database.
pub fn parse_users_document(text: &str) -> SyncResult<BTreeMap<String, ConfigRecord>> {
    if text.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let document: UsersDocument =
        serde_yaml::from_str(text).context("Failed to parse Authelia users database")?;

    let mut records = BTreeMap::new();
    for (name, user) in document.users.unwrap_or_default() {
        let identity = normalize_identity(&name)?;
        if records.contains_key(&identity) {
            warn!("Ignoring users database entry '{}': identity '{}' already loaded", name, identity);
            continue;
        }
        records.insert(
            identity.clone(),
            ConfigRecord {
                identity,
                credential_hash: user.password,
                email: user.email,
                display_name: user.displayname,
                profile_metadata: user.user_metadata,
                extra: user.extra,
            },
        );
    }
    Ok(records)
}

/// Serialize records into the users database format
pub fn render_users_document(records: &BTreeMap<String, ConfigRecord>) -> SyncResult<Vec<u8>> {
    let users = records
        .iter()
        .map(|(identity, record)| {
            (
                identity.clone(),
                DocumentUser {
                    displayname: record.display_name.clone(),
                    password: record.credential_hash.clone(),
                    email: record.email.clone(),
                    user_metadata: record.profile_metadata.clone(),
                    extra: record.extra.clone(),
                },
            )
        })
        .collect();

    let document = UsersDocument { users: Some(users) };
    let text =
        serde_yaml::to_string(&document).context("Failed to serialize Authelia users database")?;
    Ok(text.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    fn record(identity: &str, hash: &str, email: &str) -> ConfigRecord {
        ConfigRecord {
            identity: identity.to_string(),
            credential_hash: hash.to_string(),
            email: email.to_string(),
            display_name: identity.to_uppercase(),
            profile_metadata: BTreeMap::new(),
            extra: serde_yaml::Mapping::new(),
        }
    }

    #[test]
    fn test_parse_authelia_document() {
        let text = r#"
users:
  Alice:
    displayname: "Alice Liddell"
    password: "$argon2id$v=19$m=65536,t=3,p=4$c2FsdA$aGFzaA"
    email: alice@example.com
    groups:
      - admins
    user_metadata:
      locale: en-GB
  bob:
    password: "$argon2id$v=19$m=65536,t=3,p=4$c2FsdA$b3RoZXI"
"#;
        let records = parse_users_document(text).unwrap();
        assert_eq!(records.len(), 2);

        let alice = &records["alice"];
        assert_eq!(alice.identity, "alice");
        assert_eq!(alice.display_name, "Alice Liddell");
        assert_eq!(alice.email, "alice@example.com");
        assert_eq!(alice.profile_metadata.get("locale").map(String::as_str), Some("en-GB"));

        let bob = &records["bob"];
        assert!(bob.email.is_empty());
        assert!(bob.profile_metadata.is_empty());
        assert!(bob.extra.is_empty());
    }

    #[test]
    fn test_unmodelled_keys_survive_parse_and_render() {
        let text = r#"
users:
  alice:
    displayname: Alice
    password: h1
    email: a@x.com
    groups:
      - admins
      - dev
    disabled: false
"#;
        let records = parse_users_document(text).unwrap();
        let alice = &records["alice"];
        assert_eq!(alice.extra.len(), 2);
        assert!(!alice.extra.contains_key("displayname"));

        let rendered = render_users_document(&records).unwrap();
        let text = std::str::from_utf8(&rendered).unwrap();
        assert!(text.contains("groups:"));
        assert!(text.contains("- admins"));
        assert!(text.contains("disabled: false"));
        assert_eq!(parse_users_document(text).unwrap(), records);
    }

    #[test]
    fn test_empty_documents_mean_no_users() {
        assert!(parse_users_document("").unwrap().is_empty());
        assert!(parse_users_document("users:\n").unwrap().is_empty());
        assert!(parse_users_document("users: {}\n").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document_is_backend_error() {
        assert!(matches!(
            parse_users_document("users: [unterminated"),
            Err(SyncError::Backend(_))
        ));
    }

    #[test]
    fn test_render_omits_empty_metadata() {
        let mut with_meta = record("alice", "h1", "a@x.com");
        with_meta
            .profile_metadata
            .insert("shirt_size".to_string(), "L".to_string());
        let records = BTreeMap::from([
            ("alice".to_string(), with_meta),
            ("bob".to_string(), record("bob", "h2", "b@x.com")),
        ]);

        let text = String::from_utf8(render_users_document(&records).unwrap()).unwrap();
        assert!(text.starts_with("users:\n"));
        assert!(text.contains("displayname: ALICE"));
        assert!(text.contains("shirt_size: L"));
        assert_eq!(text.matches("user_metadata").count(), 1);
    }

    #[test]
    fn test_render_then_parse_preserves_records() {
        let mut alice = record("alice", "$argon2id$v=19$m=1024,t=1,p=1$c2FsdA$aGFzaA", "a@x.com");
        alice
            .profile_metadata
            .insert("given_name".to_string(), "Alice".to_string());
        let records = BTreeMap::from([
            ("alice".to_string(), alice),
            ("bob".to_string(), record("bob", "h2", "")),
        ]);

        let bytes = render_users_document(&records).unwrap();
        let parsed = parse_users_document(std::str::from_utf8(&bytes).unwrap()).unwrap();
        assert_eq!(parsed, records);
    }
}
