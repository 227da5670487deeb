// crates/server/src/main.rs
//! Evaluation service binary.
//!
//! Connects the registry (Redis when `--redis-url` is given, in-memory
//! otherwise), binds the listener, attaches artifact storage, registers the
//! background checks and serves until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use evalhub_core::{ChannelBridge, JobRegistry, MemoryRegistry};
use evalhub_server::{init_metrics, Config, ServiceManager};
use evalhub_store::{RedisFeed, RedisRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn,evalhub=info,evalhub_server=info,evalhub_core=info,evalhub_store=info,evalhub_storage=info";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
    init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "evalhub starting");

    let bridge = ChannelBridge::new();
    let (registry, feed): (Arc<dyn JobRegistry>, Option<RedisFeed>) = match &config.redis_url {
        Some(url) => {
            let registry = RedisRegistry::connect(url, config.layout()).await?;
            let feed = RedisFeed::new(
                registry.client().clone(),
                registry.layout().clone(),
                bridge.clone(),
            );
            (Arc::new(registry), Some(feed))
        }
        None => {
            tracing::warn!("No --redis-url given; registry is local to this process");
            let registry = MemoryRegistry::with_layout(config.layout(), bridge.clone());
            (Arc::new(registry), None)
        }
    };

    let mut service = ServiceManager::bind(&config, registry, bridge).await?;
    service.init_object_store(&config)?;
    if let Some(feed) = feed {
        service.add_task("redis_feed", move |shutdown| feed.run(shutdown));
    }
    service.add_required_checks(&config);

    let addr = service.local_addr()?;
    let scheme = if service.is_tls() { "wss" } else { "ws" };
    tracing::info!(%addr, tasks = ?service.task_names(), "Listening; relay at {scheme}://{addr}/ws/channel/<name>");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    service.run(shutdown).await?;
    Ok(())
}
