//! # Constants
//!
//! Shared constants used throughout the reconciler.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables (see [`crate::config::SyncConfig`]).

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Field manager name used for every patch sent to the Kubernetes API
pub const FIELD_MANAGER: &str = "authelia-sync";

/// Default namespace holding the Authelia resources
pub const DEFAULT_NAMESPACE: &str = "authelia";

/// Default ConfigMap holding the users database document
pub const DEFAULT_CONFIGMAP_NAME: &str = "authelia-users";

/// Default data key of the users database inside the ConfigMap
pub const DEFAULT_CONFIGMAP_KEY: &str = "users_database.yml";

/// Default Secret holding plaintext credentials, one entry per identity
pub const DEFAULT_SECRET_NAME: &str = "authelia-user-passwords";

/// Default workload that is restarted after a publish
pub const DEFAULT_WORKLOAD_NAME: &str = "authelia";

/// Pod template annotation carrying the restart marker
pub const DEFAULT_RESTART_ANNOTATION: &str = "authelia-sync/restartedAt";

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default prefix applied to every credential store key
pub const DEFAULT_REDIS_KEY_PREFIX: &str = "users:";

/// Reserved prefix of secondary index entries in the credential store
pub const LOOKUP_KEY_PREFIX: &str = "lookup/";

/// Lookup namespace for normalized email addresses
pub const EMAIL_LOOKUP_NAMESPACE: &str = "email";

/// Default length of generated plaintext credentials
pub const DEFAULT_CREDENTIAL_LENGTH: usize = 32;

/// Argon2id memory cost in KiB (Authelia default)
pub const DEFAULT_ARGON2_MEMORY_KIB: u32 = 65_536;

/// Argon2id iterations (Authelia default)
pub const DEFAULT_ARGON2_ITERATIONS: u32 = 3;

/// Argon2id lanes (Authelia default)
pub const DEFAULT_ARGON2_PARALLELISM: u32 = 4;

/// Argon2id salt length in bytes
pub const ARGON2_SALT_LENGTH: usize = 16;

/// Argon2id output length in bytes
pub const ARGON2_OUTPUT_LENGTH: usize = 32;

/// Deadline for a single sync pass started by the binary (seconds)
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 120;
