// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use evalhub_core::{
    ArtifactStore, ChannelBridge, CleanupCoordinator, JobRegistry, OutputRetriever,
};
use uuid::Uuid;

/// A live WebSocket relay connection.
pub struct RelayConnection {
    pub channel: String,
    pub connected_at: Instant,
}

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub registry: Arc<dyn JobRegistry>,
    /// In-process fan-out that relay connections subscribe to.
    pub bridge: ChannelBridge,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub cleanup: CleanupCoordinator,
    pub output: OutputRetriever,
    /// Open relay connections, keyed by connection id.
    pub connections: DashMap<Uuid, RelayConnection>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        bridge: ChannelBridge,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            cleanup: CleanupCoordinator::new(registry.clone(), artifacts.clone()),
            output: OutputRetriever::new(artifacts.clone()),
            registry,
            bridge,
            artifacts,
            connections: DashMap::new(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
