//! Command-line entry point.
//!
//! Loads the configuration, sets up tracing and metrics, builds every
//! service and serves them until SIGINT/SIGTERM.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hoprelay_config::{CliOverrides, LoggingConfig, apply_overrides, load_config, validate_config};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::builder::build_services;
use crate::service::{ConnectionTracker, Service};

/// hoprelay CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "hoprelay", version, about = "Multi-hop proxy chain router")]
pub struct Args {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Run every configured service until a shutdown signal arrives.
pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match hoprelay_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let tracker = ConnectionTracker::new();
    let services: Vec<Arc<Service>> = build_services(&config, &tracker)?
        .into_iter()
        .map(Arc::new)
        .collect();
    info!(services = services.len(), version = hoprelay_core::VERSION, "starting");

    let mut tasks = JoinSet::new();
    for service in &services {
        let service = Arc::clone(service);
        tasks.spawn(async move {
            let result = service.serve().await;
            (service.name().to_string(), result)
        });
    }

    tokio::select! {
        _ = shutdown_signal_handler() => info!("shutdown signal received"),
        _ = wait_all(&mut tasks) => warn!("all services stopped"),
    }

    for service in &services {
        service.close();
    }
    while let Some(joined) = tasks.join_next().await {
        if let Ok((name, Err(e))) = joined {
            error!(service = %name, error = %e, "service failed");
        }
    }

    let timeout = Duration::from_secs(config.shutdown.timeout_secs);
    let active = tracker.count();
    if active > 0 {
        info!("waiting for {} active connections to drain", active);
        if tracker.wait_for_zero(timeout).await {
            info!("all connections drained");
        } else {
            warn!(
                "shutdown timeout, {} connections still active",
                tracker.count()
            );
        }
    }

    info!("stopped");
    Ok(())
}

/// Resolve once every service task has ended, logging failures as they come.
async fn wait_all(tasks: &mut JoinSet<(String, Result<(), crate::ServiceError>)>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Err(e))) => error!(service = %name, error = %e, "service failed"),
            Ok((name, Ok(()))) => info!(service = %name, "service finished"),
            Err(e) => error!(error = %e, "service task panicked"),
        }
    }
}

/// Wait for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Initialize tracing from the logging section.
///
/// `format` is `text` (default) or `json`; output goes to stderr. The base
/// level may carry per-module directives, e.g. `info,hoprelay_chain=debug`.
fn init_tracing(config: &LoggingConfig) {
    let level = config.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.format.as_deref() {
        Some("json") => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}
