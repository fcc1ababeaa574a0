//! # HTTP Server
//!
//! HTTP server for metrics and Kubernetes health checks.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness check (always returns 200)
//! - `/readyz` - Readiness check (returns 200 once the startup sync pass has finished,
//!   with the pass outcome as the body)
//!
//! The server runs on port 5000 by default (configurable via `METRICS_PORT` environment variable).

use crate::error::{SyncError, SyncResult};
use crate::metrics::REGISTRY;
use crate::reconciler::SyncReport;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Outcome of the startup sync pass as reported by `/readyz`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PassStatus {
    Pending = 0,
    Succeeded = 1,
    PartiallyFailed = 2,
    Failed = 3,
}

impl PassStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Succeeded,
            2 => Self::PartiallyFailed,
            3 => Self::Failed,
            _ => Self::Pending,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially-failed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Default)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
    pass_status: AtomicU8,
}

impl ServerState {
    /// Record how the startup pass ended and start reporting ready
    ///
    /// A failed pass still makes the process ready; the outcome is exposed
    /// for operators and the next start retries.
    pub fn finish_startup_pass(&self, result: &SyncResult<SyncReport>) {
        let status = match result {
            Ok(_) => PassStatus::Succeeded,
            Err(SyncError::Apply(_)) => PassStatus::PartiallyFailed,
            Err(_) => PassStatus::Failed,
        };
        self.pass_status.store(status as u8, Ordering::Relaxed);
        self.is_ready.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn pass_status(&self) -> PassStatus {
        PassStatus::from_u8(self.pass_status.load(Ordering::Relaxed))
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let code = if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, format!("startup sync {}", state.pass_status().as_str()))
}
