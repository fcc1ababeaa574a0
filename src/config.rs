//! # Sync Configuration
//!
//! Process-level settings loaded from environment variables.

use crate::constants::*;
use crate::credential::HashPolicy;
use std::str::FromStr;
use std::time::Duration;

/// Which key-value system backs the credential store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackendKind {
    /// Redis (or any RESP-compatible server)
    Redis,
    /// Process-local map, lost on exit
    Memory,
}

impl FromStr for StoreBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Kind of workload running the Authelia daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl WorkloadKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::DaemonSet => "DaemonSet",
        }
    }
}

impl FromStr for WorkloadKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deployment" => Ok(Self::Deployment),
            "statefulset" => Ok(Self::StatefulSet),
            "daemonset" => Ok(Self::DaemonSet),
            other => Err(format!("unknown workload kind: {other}")),
        }
    }
}

/// Reconciler configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
/// Environment variables are populated from a ConfigMap using `envFrom` in the deployment.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Namespace of the Authelia ConfigMap, Secret and workload
    pub namespace: String,
    /// ConfigMap holding the users database document
    pub configmap_name: String,
    /// Data key of the document inside the ConfigMap
    pub configmap_key: String,
    /// Secret receiving plaintext credentials
    pub secret_name: String,
    pub workload_kind: WorkloadKind,
    pub workload_name: String,
    /// Pod template annotation set to an RFC3339 timestamp on restart
    pub restart_annotation: String,
    pub store_backend: StoreBackendKind,
    pub redis_url: String,
    /// Prefix namespacing every key written to the store
    pub redis_key_prefix: String,
    /// Length of generated plaintext credentials
    pub credential_length: usize,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
    /// Deadline applied by the binary to one sync pass
    pub sync_timeout_secs: u64,
    pub metrics_port: u16,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            configmap_name: DEFAULT_CONFIGMAP_NAME.to_string(),
            configmap_key: DEFAULT_CONFIGMAP_KEY.to_string(),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            workload_kind: WorkloadKind::Deployment,
            workload_name: DEFAULT_WORKLOAD_NAME.to_string(),
            restart_annotation: DEFAULT_RESTART_ANNOTATION.to_string(),
            store_backend: StoreBackendKind::Redis,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            redis_key_prefix: DEFAULT_REDIS_KEY_PREFIX.to_string(),
            credential_length: DEFAULT_CREDENTIAL_LENGTH,
            argon2_memory_kib: DEFAULT_ARGON2_MEMORY_KIB,
            argon2_iterations: DEFAULT_ARGON2_ITERATIONS,
            argon2_parallelism: DEFAULT_ARGON2_PARALLELISM,
            sync_timeout_secs: DEFAULT_SYNC_TIMEOUT_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    ///
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);

        Self {
            namespace: string("POD_NAMESPACE", defaults.namespace),
            configmap_name: string("AUTHELIA_CONFIGMAP_NAME", defaults.configmap_name),
            configmap_key: string("AUTHELIA_CONFIGMAP_KEY", defaults.configmap_key),
            secret_name: string("AUTHELIA_SECRET_NAME", defaults.secret_name),
            workload_kind: parsed(&lookup, "AUTHELIA_WORKLOAD_KIND")
                .unwrap_or(defaults.workload_kind),
            workload_name: string("AUTHELIA_WORKLOAD_NAME", defaults.workload_name),
            restart_annotation: string("AUTHELIA_RESTART_ANNOTATION", defaults.restart_annotation),
            store_backend: parsed(&lookup, "STORE_BACKEND").unwrap_or(defaults.store_backend),
            redis_url: string("REDIS_URL", defaults.redis_url),
            redis_key_prefix: string("REDIS_KEY_PREFIX", defaults.redis_key_prefix),
            credential_length: parsed(&lookup, "CREDENTIAL_LENGTH")
                .unwrap_or(defaults.credential_length),
            argon2_memory_kib: parsed(&lookup, "ARGON2_MEMORY_KIB")
                .unwrap_or(defaults.argon2_memory_kib),
            argon2_iterations: parsed(&lookup, "ARGON2_ITERATIONS")
                .unwrap_or(defaults.argon2_iterations),
            argon2_parallelism: parsed(&lookup, "ARGON2_PARALLELISM")
                .unwrap_or(defaults.argon2_parallelism),
            sync_timeout_secs: parsed(&lookup, "SYNC_TIMEOUT_SECS")
                .unwrap_or(defaults.sync_timeout_secs),
            metrics_port: parsed(&lookup, "METRICS_PORT").unwrap_or(defaults.metrics_port),
            log_level: string("LOG_LEVEL", defaults.log_level),
        }
    }

    /// Argon2id cost parameters for generated credentials
    pub fn hash_policy(&self) -> HashPolicy {
        HashPolicy {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// Get sync pass deadline
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }
}

/// Parse a variable, treating absent and malformed values alike
fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
