//! # Authelia Sync
//!
//! Command-line entry point.
//!
//! ## Usage
//!
//! ```bash
//! # Run one sync pass at startup, then serve metrics and health checks until stopped
//! authelia-sync serve
//!
//! # Run a single sync pass and exit
//! authelia-sync sync
//!
//! # Print a fresh credential (line 1) and its Argon2id hash (line 2)
//! authelia-sync generate --length 48
//! ```
//!
//! Settings come from environment variables, see [`authelia_sync::SyncConfig`].

use anyhow::{bail, Context, Result};
use authelia_sync::config::StoreBackendKind;
use authelia_sync::server::{start_server, ServerState};
use authelia_sync::{
    metrics, CredentialGenerator, CredentialSource, InMemoryBackend, KeyValueBackend,
    KubernetesOrigin, KvCredentialStore, Reconciler, RedisBackend, SyncConfig, SyncError,
    SyncReport, SyncResult,
};
use clap::{Parser, Subcommand};
use futures::future::{BoxFuture, FutureExt, Shared};
use kube::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Authelia users database sync
#[derive(Debug, Parser)]
#[command(name = "authelia-sync", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sync once at startup, then serve metrics and health checks until terminated (default)
    Serve,
    /// Run one sync pass and exit; non-zero exit status on any failure
    Sync,
    /// Print a freshly generated credential and its hash
    Generate {
        /// Plaintext length (defaults to CREDENTIAL_LENGTH)
        #[arg(short, long)]
        length: Option<usize>,
    },
}

type ShutdownSignal = Shared<BoxFuture<'static, ()>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = SyncConfig::from_env();

    match cli.command.unwrap_or(Commands::Serve) {
        // Stdout carries the credential only, so no logging here.
        Commands::Generate { length } => generate_command(&config, length),
        Commands::Sync => {
            initialize(&config)?;
            sync_command(&config).await
        }
        Commands::Serve => {
            initialize(&config)?;
            serve_command(&config).await
        }
    }
}

fn initialize(config: &SyncConfig) -> Result<()> {
    // Must happen before the first TLS connection to the API server.
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        bail!("Failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("authelia_sync={}", config.log_level).into()),
        )
        .init();

    info!("Starting Authelia Sync v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(
        "Syncing {} {}/{} (ConfigMap {}, Secret {}) against {:?} store",
        config.workload_kind.as_str(),
        config.namespace,
        config.workload_name,
        config.configmap_name,
        config.secret_name,
        config.store_backend
    );

    metrics::register_metrics()?;
    Ok(())
}

fn generate_command(config: &SyncConfig, length: Option<usize>) -> Result<()> {
    let generator = CredentialGenerator::new(
        length.unwrap_or(config.credential_length),
        config.hash_policy(),
    )?;
    let pair = generator.generate()?;
    println!("{}", pair.plaintext.as_str());
    println!("{}", pair.hash);
    Ok(())
}

async fn sync_command(config: &SyncConfig) -> Result<()> {
    let reconciler = build_reconciler(config).await?;
    let report = run_pass(&reconciler, config.sync_timeout(), shutdown_signal()).await?;
    log_report(&report);
    Ok(())
}

async fn serve_command(config: &SyncConfig) -> Result<()> {
    let server_state = Arc::new(ServerState::default());
    let state = Arc::clone(&server_state);
    let port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    let shutdown = shutdown_signal();

    // Startup pass is best effort; a failed pass is retried on the next start.
    let outcome = match build_reconciler(config).await {
        Ok(reconciler) => run_pass(&reconciler, config.sync_timeout(), shutdown.clone()).await,
        Err(e) => Err(SyncError::Backend(e.context("Failed to set up sync"))),
    };
    match &outcome {
        Ok(report) => log_report(report),
        Err(SyncError::Apply(failures)) => {
            for failure in failures {
                warn!("Startup sync failed for {}: {}", failure.identity, failure.error);
            }
        }
        Err(e) => warn!("Startup sync did not complete: {:#}", e),
    }
    server_state.finish_startup_pass(&outcome);

    if shutdown.peek().is_none() {
        info!("Serving metrics and health checks until terminated");
        shutdown.await;
    }
    info!("Authelia Sync stopped");
    Ok(())
}

async fn build_reconciler(config: &SyncConfig) -> Result<Reconciler> {
    let backend: Arc<dyn KeyValueBackend> = match config.store_backend {
        StoreBackendKind::Redis => Arc::new(
            RedisBackend::connect(&config.redis_url, config.redis_key_prefix.clone())
                .await
                .context("Failed to connect to credential store")?,
        ),
        StoreBackendKind::Memory => {
            warn!("Using in-memory credential store; records are lost on exit");
            Arc::new(InMemoryBackend::new())
        }
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let credentials = CredentialGenerator::new(config.credential_length, config.hash_policy())?;

    Ok(Reconciler::new(
        Arc::new(KvCredentialStore::new(backend)),
        Arc::new(KubernetesOrigin::new(client, config)),
        Arc::new(credentials),
    ))
}

/// One pass, abandoned when the deadline passes or the process is asked to stop
async fn run_pass(
    reconciler: &Reconciler,
    timeout: Duration,
    shutdown: ShutdownSignal,
) -> SyncResult<SyncReport> {
    let deadline = async move {
        tokio::select! {
            () = tokio::time::sleep(timeout) => {
                warn!("Sync pass exceeded {}s deadline", timeout.as_secs());
            }
            () = shutdown => {}
        }
    };
    reconciler.sync_until(deadline).await
}

fn log_report(report: &SyncReport) {
    info!(
        "Sync report: {} identities, rotated [{}], published={}",
        report.actions.len(),
        report.rotated.join(", "),
        report.published
    );
}

/// Resolves on Ctrl-C or SIGTERM; clones resolve together
fn shutdown_signal() -> ShutdownSignal {
    async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {},
            () = terminate => {},
        }

        info!("Shutdown signal received");
    }
    .boxed()
    .shared()
}
