// crates/server/src/service.rs
//! Service manager: owns the listener, the optional artifact store and the
//! background tasks, and runs them all until shutdown.
//!
//! Startup order is `bind` -> `init_object_store` -> `add_*_task` -> `run`.
//! `run` cancels every background task together when the serve loop ends.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use evalhub_core::{ArtifactStore, ChannelBridge, DisabledArtifacts, JobRegistry};
use evalhub_storage::{ObjectArtifactStore, StorageError};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::state::AppState;
use crate::tasks::{bridge_stats, orphaned_artifacts, registry_health};
use crate::tls::TlsError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct BackgroundTask {
    name: String,
    run: TaskFn,
}

pub struct ServiceManager {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    registry: Arc<dyn JobRegistry>,
    bridge: ChannelBridge,
    artifacts: Arc<dyn ArtifactStore>,
    tasks: Vec<BackgroundTask>,
}

impl ServiceManager {
    /// Bind the listening socket. TLS is used when key material is found
    /// (see [`crate::tls::TlsPaths::resolve`]).
    pub async fn bind(
        config: &Config,
        registry: Arc<dyn JobRegistry>,
        bridge: ChannelBridge,
    ) -> Result<Self, ServiceError> {
        let tls = match config.tls_paths()? {
            Some(paths) => {
                info!(cert = %paths.cert.display(), key = %paths.key.display(), "TLS enabled");
                Some(paths.acceptor()?)
            }
            None => {
                warn!("No TLS key material found; serving plain connections");
                None
            }
        };

        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind { addr, source })?;

        Ok(Self {
            listener,
            tls,
            registry,
            bridge,
            artifacts: Arc::new(DisabledArtifacts),
            tasks: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServiceError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    /// Attach artifact storage unless it was switched off. Without it,
    /// cleanup skips artifacts and output retrieval answers 503.
    pub fn init_object_store(&mut self, config: &Config) -> Result<(), ServiceError> {
        match config.storage()? {
            Some(storage) => {
                let store = ObjectArtifactStore::new(storage)?;
                info!(kind = store.kind().as_str(), "Artifact storage attached");
                self.artifacts = Arc::new(store);
            }
            None => info!("Artifact storage disabled"),
        }
        Ok(())
    }

    /// Register a long-running task. It receives a token that fires on
    /// shutdown and should return promptly once it does.
    pub fn add_task<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.tasks.push(BackgroundTask {
            name: name.into(),
            run: Box::new(move |shutdown| task(shutdown).boxed()),
        });
    }

    /// Register a task that runs immediately and then once per `every`.
    pub fn add_recurring_task<F, Fut>(&mut self, name: impl Into<String>, every: Duration, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let label = name.clone();
        self.add_task(name, move |shutdown| async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = task() => {}
                        }
                    }
                }
            }
            debug!(task = %label, "Recurring task stopped");
        });
    }

    /// Register the standard checks against the current registry, bridge
    /// and artifact store. Call after [`Self::init_object_store`].
    pub fn add_required_checks(&mut self, config: &Config) {
        let registry = self.registry.clone();
        self.add_recurring_task("registry_health", config.health_interval(), move || {
            let registry = registry.clone();
            async move {
                registry_health(&*registry).await;
            }
        });

        let registry = self.registry.clone();
        let artifacts = self.artifacts.clone();
        self.add_recurring_task("orphaned_artifacts", config.orphan_interval(), move || {
            let registry = registry.clone();
            let artifacts = artifacts.clone();
            async move {
                if let Err(e) = orphaned_artifacts(&*registry, &*artifacts).await {
                    warn!(error = %e, "Orphaned artifact check failed");
                }
            }
        });

        let bridge = self.bridge.clone();
        self.add_recurring_task("bridge_stats", config.stats_interval(), move || {
            let bridge = bridge.clone();
            async move {
                bridge_stats(&bridge);
            }
        });
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Serve connections and run every background task until `shutdown`
    /// fires or the listener fails.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServiceError> {
        let Self {
            listener,
            tls,
            registry,
            bridge,
            artifacts,
            tasks,
        } = self;

        let app = crate::app(AppState::new(registry, bridge, artifacts));

        let mut running = JoinSet::new();
        for task in tasks {
            info!(task = %task.name, "Starting background task");
            running.spawn((task.run)(shutdown.child_token()));
        }

        let served = match tls {
            Some(acceptor) => serve_tls(listener, acceptor, app, shutdown.clone()).await,
            None => axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.clone().cancelled_owned())
                .await
                .map_err(ServiceError::from),
        };

        shutdown.cancel();
        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Background task ended abnormally");
            }
        }
        info!("Service stopped");
        served
    }
}

/// Pause after a failed accept so persistent errors such as EMFILE do not
/// spin the loop. Doubles per consecutive failure, resets on success.
#[derive(Debug)]
struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    const MIN: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self { next: Self::MIN }
    }

    fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = Self::MIN;
    }
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), ServiceError> {
    let mut backoff = AcceptBackoff::new();
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(conn) => {
                    backoff.reset();
                    conn
                }
                Err(e) => {
                    let delay = backoff.failed();
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Accept failed");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let app = app.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
            };

            let service = TowerToHyperService::new(
                app.map_request(|req: hyper::Request<Incoming>| req.map(Body::new)),
            );
            let builder = Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls_stream), service);
            let mut conn = std::pin::pin!(conn);

            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(%peer, error = %e, "Connection closed with error");
                    }
                }
                _ = shutdown.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.as_mut().await;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_grows_to_cap_and_resets() {
        let mut backoff = AcceptBackoff::new();
        assert_eq!(backoff.failed(), Duration::from_millis(5));
        assert_eq!(backoff.failed(), Duration::from_millis(10));
        assert_eq!(backoff.failed(), Duration::from_millis(20));

        for _ in 0..20 {
            backoff.failed();
        }
        assert_eq!(backoff.failed(), AcceptBackoff::MAX);

        backoff.reset();
        assert_eq!(backoff.failed(), AcceptBackoff::MIN);
    }
}
