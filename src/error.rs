//! # Errors
//!
//! Error taxonomy shared by the store adapter, the runtime configuration
//! adapter, the credential generator and the reconciler.

use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A record that had to exist was absent
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// The credential store or the Kubernetes API failed
    #[error("backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),

    /// Malformed input, e.g. an empty identity
    #[error("invalid input: {0}")]
    Validation(String),

    /// The random source or the password hasher could not produce a credential
    #[error("credential generation failed: {0}")]
    RandomSourceExhausted(String),

    /// The caller abandoned the pass before it finished
    #[error("sync cancelled")]
    Cancelled,

    /// One or more identities could not be applied; the others stay committed
    #[error("{} identities failed to apply: {}", .0.len(), describe_failures(.0))]
    Apply(Vec<ApplyFailure>),
}

impl SyncError {
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        SyncError::NotFound {
            kind,
            key: key.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        SyncError::Validation(message.into())
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound { .. })
    }
}

/// A per-identity failure collected during the apply phase
#[derive(Debug)]
pub struct ApplyFailure {
    pub identity: String,
    pub error: SyncError,
}

fn describe_failures(failures: &[ApplyFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.identity, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_error_joins_all_failures() {
        let err = SyncError::Apply(vec![
            ApplyFailure {
                identity: "alice".to_string(),
                error: SyncError::validation("empty email"),
            },
            ApplyFailure {
                identity: "bob".to_string(),
                error: SyncError::Backend(anyhow::anyhow!("connection reset")),
            },
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 identities failed to apply"));
        assert!(message.contains("alice: invalid input: empty email"));
        assert!(message.contains("bob: backend failure: connection reset"));
    }

    #[test]
    fn test_backend_error_keeps_context_chain() {
        let source = anyhow::anyhow!("timed out").context("Failed to read ConfigMap authelia/users");
        let err = SyncError::from(source);
        assert_eq!(
            err.to_string(),
            "backend failure: Failed to read ConfigMap authelia/users: timed out"
        );
    }

    #[test]
    fn test_not_found_classification() {
        assert!(SyncError::not_found("user", "alice").is_not_found());
        assert!(!SyncError::Cancelled.is_not_found());
    }
}
