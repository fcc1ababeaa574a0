//! # Redis Backend
//!
//! [`KeyValueBackend`] on top of the `fred` client. Every key is namespaced
//! with a configurable prefix so the credential store can share a Redis
//! database with other consumers; enumeration uses `SCAN` on `<prefix>*`.

use super::backend::KeyValueBackend;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fred::prelude::*;
use fred::types::scan::Scanner;
use futures::TryStreamExt;
use tracing::{debug, info};

/// Page size hint for `SCAN`
const SCAN_COUNT: u32 = 200;

pub struct RedisBackend {
    client: Client,
    key_prefix: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connect to Redis and wait for the connection to be usable
    pub async fn connect(url: &str, key_prefix: impl Into<String>) -> Result<Self> {
        let config = Config::from_url(url).context("Invalid Redis URL")?;
        let client = Client::new(
            config,
            None,
            None,
            Some(ReconnectPolicy::new_exponential(0, 1000, 30_000, 2)),
        );
        client
            .init()
            .await
            .context("Failed to connect to Redis")?;

        let key_prefix = key_prefix.into();
        info!("Connected to Redis credential store (key prefix '{}')", key_prefix);
        Ok(Self { client, key_prefix })
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl KeyValueBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = self.prefixed(key);
        self.client
            .get::<Option<String>, _>(&key)
            .await
            .with_context(|| format!("Failed to GET {key}"))
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        let key = self.prefixed(key);
        self.client
            .set::<(), _, _>(&key, value, None, None, false)
            .await
            .with_context(|| format!("Failed to SET {key}"))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}*", self.key_prefix);
        let mut scanner = self.client.scan(pattern.as_str(), Some(SCAN_COUNT), None);
        let mut keys = Vec::new();

        while let Some(page) = scanner
            .try_next()
            .await
            .with_context(|| format!("Failed to SCAN {pattern}"))?
        {
            if let Some(results) = page.results() {
                for key in results {
                    if let Some(stripped) = key
                        .as_str()
                        .and_then(|k| k.strip_prefix(self.key_prefix.as_str()))
                    {
                        keys.push(stripped.to_string());
                    }
                }
            }
        }

        debug!("Scanned {} keys under prefix '{}'", keys.len(), self.key_prefix);
        Ok(keys)
    }
}
