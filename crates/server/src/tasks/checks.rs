// crates/server/src/tasks/checks.rs
//! Individual check bodies. Each runs once per call; scheduling lives in
//! the service manager.

use evalhub_core::{ArtifactError, ArtifactStore, ChannelBridge, JobId, JobRegistry, RegistryError};
use thiserror::Error;

use crate::metrics;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Artifacts(#[from] ArtifactError),
}

/// Ping the registry. Returns whether it answered.
pub async fn registry_health(registry: &dyn JobRegistry) -> bool {
    match registry.ping().await {
        Ok(()) => {
            tracing::debug!("Registry reachable");
            true
        }
        Err(e) => {
            metrics::record_ping_failure();
            tracing::warn!(error = %e, "Registry health check failed");
            false
        }
    }
}

/// Jobs that still have stored artifacts but no registry record.
///
/// Nothing is deleted here; a job removed from the registry while its
/// artifacts stayed behind needs a follow-up cleanup request. A disabled
/// artifact store yields an empty list.
pub async fn orphaned_artifacts(
    registry: &dyn JobRegistry,
    artifacts: &dyn ArtifactStore,
) -> Result<Vec<String>, CheckError> {
    if !artifacts.is_available() {
        return Ok(Vec::new());
    }

    let mut orphans = Vec::new();
    for name in artifacts.list_jobs().await? {
        if !registry.exists(&JobId::new(name.clone())).await? {
            orphans.push(name);
        }
    }

    metrics::record_orphans(orphans.len());
    if orphans.is_empty() {
        tracing::debug!("No orphaned artifacts");
    } else {
        tracing::warn!(count = orphans.len(), jobs = ?orphans, "Artifacts without a registry record");
    }
    Ok(orphans)
}

/// Report open channels and subscribers. Returns `(channels, subscribers)`.
pub fn bridge_stats(bridge: &ChannelBridge) -> (usize, usize) {
    let channels = bridge.channel_count();
    let subscribers = bridge.total_subscribers();
    metrics::record_bridge(channels, subscribers);
    tracing::debug!(channels, subscribers, "Bridge stats");
    (channels, subscribers)
}
