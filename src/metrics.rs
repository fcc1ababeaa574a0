//! # Metrics
//!
//! Prometheus metrics for monitoring the sync engine.
//!
//! ## Metrics Exposed
//!
//! - `authelia_sync_runs_total` - Total number of sync passes started
//! - `authelia_sync_errors_total` - Total number of sync passes that did not complete cleanly
//! - `authelia_sync_duration_seconds` - Duration of sync passes
//! - `authelia_sync_actions_total{action}` - Actions assigned by the compare phase
//! - `authelia_sync_credentials_rotated_total` - Credentials generated and stored
//! - `authelia_sync_publish_total` - Publishes of the users database, Secret and restart

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNC_RUNS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("authelia_sync_runs_total", "Total number of sync passes started")
        .expect("Failed to create SYNC_RUNS_TOTAL metric - this should never happen")
});

static SYNC_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "authelia_sync_errors_total",
        "Total number of sync passes that failed, partially failed or were cancelled",
    )
    .expect("Failed to create SYNC_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "authelia_sync_duration_seconds",
            "Duration of sync passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create SYNC_DURATION metric - this should never happen")
});

static SYNC_ACTIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "authelia_sync_actions_total",
            "Total number of actions assigned per identity, by action",
        ),
        &["action"],
    )
    .expect("Failed to create SYNC_ACTIONS_TOTAL metric - this should never happen")
});

static CREDENTIALS_ROTATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "authelia_sync_credentials_rotated_total",
        "Total number of credentials generated and stored",
    )
    .expect("Failed to create CREDENTIALS_ROTATED_TOTAL metric - this should never happen")
});

static PUBLISH_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "authelia_sync_publish_total",
        "Total number of completed publishes to Authelia",
    )
    .expect("Failed to create PUBLISH_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_DURATION.clone()))?;
    REGISTRY.register(Box::new(SYNC_ACTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREDENTIALS_ROTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PUBLISH_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_sync_runs() {
    SYNC_RUNS_TOTAL.inc();
}

pub fn increment_sync_errors() {
    SYNC_ERRORS_TOTAL.inc();
}

pub fn observe_sync_duration(duration: f64) {
    SYNC_DURATION.observe(duration);
}

pub fn increment_action(action: &str) {
    SYNC_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn increment_credentials_rotated(count: usize) {
    CREDENTIALS_ROTATED_TOTAL.inc_by(count as u64);
}

pub fn increment_publishes() {
    PUBLISH_TOTAL.inc();
}
