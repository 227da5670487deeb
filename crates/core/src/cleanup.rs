// crates/core/src/cleanup.rs
//! Tear-down of a finished evaluation: status gate, atomic registry
//! deletion with notification, then artifact removal.
//!
//! `clean` never fails. Every outcome, including backend errors, comes back
//! as a [`CleanupResult`] describing what happened.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::artifacts::ArtifactStore;
use crate::error::{ArtifactError, RegistryError};
use crate::job::JobId;
use crate::message::{ChannelMessage, Notice};
use crate::registry::{BatchOutcome, CleanupBatch, JobRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStatus {
    Success,
    StillRunning,
    NotFound,
    PartialFailure,
}

impl CleanupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupStatus::Success => "success",
            CleanupStatus::StillRunning => "still_running",
            CleanupStatus::NotFound => "not_found",
            CleanupStatus::PartialFailure => "partial_failure",
        }
    }
}

/// Report for one cleanup attempt. Serializes to the response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupResult {
    pub evaluation: String,
    pub records_removed: bool,
    pub errors: Vec<String>,
    pub messages: Vec<String>,
    pub removed_files: Vec<String>,
    #[serde(skip)]
    pub status: CleanupStatus,
}

impl CleanupResult {
    fn new(job: &JobId) -> Self {
        Self {
            evaluation: job.to_string(),
            records_removed: false,
            errors: Vec::new(),
            messages: Vec::new(),
            removed_files: Vec::new(),
            status: CleanupStatus::Success,
        }
    }
}

pub struct CleanupCoordinator {
    registry: Arc<dyn JobRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl CleanupCoordinator {
    pub fn new(registry: Arc<dyn JobRegistry>, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            registry,
            artifacts,
        }
    }

    pub async fn clean(&self, job: &JobId) -> CleanupResult {
        let mut result = CleanupResult::new(job);

        match self.clean_records(job, &mut result).await {
            Ok(status) => result.status = status,
            Err(e) => {
                warn!(evaluation = %job, error = %e, "registry cleanup failed");
                result.messages.push(format!("{job} could not be removed. {e}"));
                result.errors.push(e.to_string());
                result.status = CleanupStatus::PartialFailure;
                return result;
            }
        }

        // A running job keeps its artifacts; a missing one may still have some.
        if matches!(result.status, CleanupStatus::Success | CleanupStatus::NotFound) {
            self.remove_artifacts(job, &mut result).await;
        }

        info!(
            evaluation = %job,
            status = result.status.as_str(),
            records_removed = result.records_removed,
            removed_files = result.removed_files.len(),
            "cleanup finished"
        );
        result
    }

    async fn clean_records(
        &self,
        job: &JobId,
        result: &mut CleanupResult,
    ) -> Result<CleanupStatus, RegistryError> {
        let channel = self.registry.layout().channel_name(job);

        if !self.registry.exists(job).await? {
            return self.report_missing(job, channel, result).await;
        }
        if !self.registry.get_completed(job).await? {
            return Ok(Self::report_running(job, result));
        }

        let batch = CleanupBatch {
            job: job.clone(),
            keys: self.registry.get_pointers(job).await?,
            notice: ChannelMessage::new(channel.clone(), Notice::removed(job).to_payload()),
        };

        // The batch re-checks the job; its outcome, not the reads above,
        // decides who removed the records.
        match self.registry.execute(&batch).await? {
            BatchOutcome::Applied { deleted } => {
                info!(evaluation = %job, deleted, "evaluation records removed");
                result.records_removed = true;
                result
                    .messages
                    .push(format!("The '{job}' evaluation has been removed"));
                Ok(CleanupStatus::Success)
            }
            BatchOutcome::Missing => self.report_missing(job, channel, result).await,
            BatchOutcome::Incomplete => Ok(Self::report_running(job, result)),
        }
    }

    async fn report_missing(
        &self,
        job: &JobId,
        channel: String,
        result: &mut CleanupResult,
    ) -> Result<CleanupStatus, RegistryError> {
        let message = format!(
            "No evaluation named '{job}' was found. Either the wrong key was entered or it was \
             already removed. No records were removed."
        );
        result.messages.push(message.clone());
        let notice = ChannelMessage::new(channel, Notice::not_found(job, message).to_payload());
        self.registry.publish(&notice).await?;
        Ok(CleanupStatus::NotFound)
    }

    fn report_running(job: &JobId, result: &mut CleanupResult) -> CleanupStatus {
        result
            .messages
            .push(format!("The '{job}' evaluation is still ongoing"));
        CleanupStatus::StillRunning
    }

    async fn remove_artifacts(&self, job: &JobId, result: &mut CleanupResult) {
        match self.artifacts.remove_artifacts(job).await {
            Ok(names) => result.removed_files.extend(names),
            Err(ArtifactError::Unavailable) => {
                result
                    .messages
                    .push("Artifact storage is unavailable; no files were removed".to_string());
            }
            Err(e) => {
                // Registry state already removed stays removed.
                warn!(evaluation = %job, error = %e, "artifact removal failed");
                result.messages.push(e.to_string());
                result.errors.push(e.to_string());
                result.status = CleanupStatus::PartialFailure;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{DisabledArtifacts, OutputFormat, WrittenOutput};
    use crate::bridge::ChannelBridge;
    use crate::job::KeyLayout;
    use crate::registry::memory::MemoryRegistry;
    use async_trait::async_trait;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Artifact store that records removal calls.
    #[derive(Default)]
    struct RecordingArtifacts {
        removals: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactStore for RecordingArtifacts {
        async fn write_output(
            &self,
            _job: &JobId,
            _format: OutputFormat,
            _raw_bytes: Bytes,
        ) -> Result<String, ArtifactError> {
            Ok(String::new())
        }

        async fn read_output(
            &self,
            job: &JobId,
            format: OutputFormat,
        ) -> Result<WrittenOutput, ArtifactError> {
            Err(ArtifactError::NotFound {
                job: job.to_string(),
                format: format.to_string(),
            })
        }

        async fn remove_artifacts(&self, job: &JobId) -> Result<Vec<String>, ArtifactError> {
            self.removals.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ArtifactError::Backend("bucket unreachable".into()));
            }
            Ok(vec![format!("evaluations/{job}/{job}.json")])
        }

        async fn list_jobs(&self) -> Result<Vec<String>, ArtifactError> {
            Ok(Vec::new())
        }
    }

    /// Registry whose every call fails.
    struct BrokenRegistry(KeyLayout);

    #[async_trait]
    impl JobRegistry for BrokenRegistry {
        fn layout(&self) -> &KeyLayout {
            &self.0
        }
        async fn exists(&self, _job: &JobId) -> Result<bool, RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn get_completed(&self, _job: &JobId) -> Result<bool, RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn get_pointers(&self, _job: &JobId) -> Result<BTreeSet<String>, RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn delete_all(&self, _keys: &BTreeSet<String>) -> Result<usize, RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn publish(&self, _message: &ChannelMessage) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn execute(&self, _batch: &CleanupBatch) -> Result<BatchOutcome, RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn register(&self, _job: &JobId) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn add_pointer(&self, _job: &JobId, _key: &str) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn mark_completed(&self, _job: &JobId) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
        async fn ping(&self) -> Result<(), RegistryError> {
            Err(RegistryError::Unavailable("connection refused".into()))
        }
    }

    fn setup(artifacts: Arc<RecordingArtifacts>) -> (Arc<MemoryRegistry>, CleanupCoordinator) {
        let registry = Arc::new(MemoryRegistry::new(ChannelBridge::new()));
        let coordinator = CleanupCoordinator::new(registry.clone(), artifacts);
        (registry, coordinator)
    }

    #[tokio::test]
    async fn test_clean_completed_job() {
        let artifacts = Arc::new(RecordingArtifacts::default());
        let (registry, coordinator) = setup(artifacts.clone());
        let job = JobId::new("eval-42");

        registry.register(&job).await.unwrap();
        registry.set("eval-42:result", "{}").unwrap();
        registry.add_pointer(&job, "eval-42:meta").await.unwrap();
        registry.add_pointer(&job, "eval-42:result").await.unwrap();
        registry.mark_completed(&job).await.unwrap();

        let mut sub = registry.bridge().subscribe("eval-42");
        let result = coordinator.clean(&job).await;

        assert_eq!(result.status, CleanupStatus::Success);
        assert!(result.records_removed);
        assert_eq!(result.errors, Vec::<String>::new());
        assert_eq!(result.messages, vec!["The 'eval-42' evaluation has been removed".to_string()]);
        assert_eq!(result.removed_files, vec!["evaluations/eval-42/eval-42.json".to_string()]);
        assert!(!registry.contains_key("eval-42:meta").unwrap());
        assert!(!registry.contains_key("eval-42:result").unwrap());
        assert_eq!(artifacts.removals.load(Ordering::SeqCst), 1);

        // Exactly one message, and it is the termination notice.
        assert!(sub.next().await.unwrap().is_termination());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_clean_running_job_is_refused() {
        let artifacts = Arc::new(RecordingArtifacts::default());
        let (registry, coordinator) = setup(artifacts.clone());
        let job = JobId::new("eval-7");
        registry.register(&job).await.unwrap();
        registry.add_pointer(&job, "eval-7:partial").await.unwrap();
        let before = registry.get_pointers(&job).await.unwrap();

        let result = coordinator.clean(&job).await;

        assert_eq!(result.status, CleanupStatus::StillRunning);
        assert!(!result.records_removed);
        assert_eq!(result.messages, vec!["The 'eval-7' evaluation is still ongoing".to_string()]);
        assert_eq!(registry.get_pointers(&job).await.unwrap(), before);
        assert!(registry.contains_key("eval-7:meta").unwrap());
        assert_eq!(artifacts.removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clean_unknown_job_still_removes_artifacts() {
        let artifacts = Arc::new(RecordingArtifacts::default());
        let (registry, coordinator) = setup(artifacts.clone());
        let mut sub = registry.bridge().subscribe("ghost");

        let result = coordinator.clean(&JobId::new("ghost")).await;

        assert_eq!(result.status, CleanupStatus::NotFound);
        assert!(!result.records_removed);
        assert!(result.messages[0].starts_with("No evaluation named 'ghost' was found."));
        assert_eq!(artifacts.removals.load(Ordering::SeqCst), 1);
        assert_eq!(result.removed_files.len(), 1);

        let notice = sub.next().await.unwrap();
        assert!(!notice.is_termination());
        assert!(matches!(
            Notice::parse(&notice.payload),
            Some(Notice::EvaluationNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_artifact_failure_is_partial_without_rollback() {
        let artifacts = Arc::new(RecordingArtifacts {
            fail: true,
            ..Default::default()
        });
        let (registry, coordinator) = setup(artifacts);
        let job = JobId::new("eval-3");
        registry.register(&job).await.unwrap();
        registry.mark_completed(&job).await.unwrap();

        let result = coordinator.clean(&job).await;

        assert_eq!(result.status, CleanupStatus::PartialFailure);
        assert!(result.records_removed);
        assert_eq!(result.errors, vec!["artifact storage failed: bucket unreachable".to_string()]);
        assert!(!registry.exists(&job).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_artifacts_is_not_an_error() {
        let registry = Arc::new(MemoryRegistry::new(ChannelBridge::new()));
        let coordinator = CleanupCoordinator::new(registry.clone(), Arc::new(DisabledArtifacts));
        let job = JobId::new("eval-4");
        registry.register(&job).await.unwrap();
        registry.mark_completed(&job).await.unwrap();

        let result = coordinator.clean(&job).await;

        assert_eq!(result.status, CleanupStatus::Success);
        assert!(result.errors.is_empty());
        assert!(result
            .messages
            .contains(&"Artifact storage is unavailable; no files were removed".to_string()));
    }

    #[tokio::test]
    async fn test_registry_failure_is_caught() {
        let artifacts = Arc::new(RecordingArtifacts::default());
        let coordinator = CleanupCoordinator::new(
            Arc::new(BrokenRegistry(KeyLayout::default())),
            artifacts.clone(),
        );

        let result = coordinator.clean(&JobId::new("eval-5")).await;

        assert_eq!(result.status, CleanupStatus::PartialFailure);
        assert!(!result.records_removed);
        assert_eq!(result.errors, vec!["registry unreachable: connection refused".to_string()]);
        assert!(result.messages[0].starts_with("eval-5 could not be removed."));
        assert_eq!(artifacts.removals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_cleans_remove_once() {
        for round in 0..20 {
            let artifacts = Arc::new(RecordingArtifacts::default());
            let (registry, coordinator) = setup(artifacts);
            let coordinator = Arc::new(coordinator);
            let job = JobId::new(format!("eval-race-{round}"));
            registry.register(&job).await.unwrap();
            registry.mark_completed(&job).await.unwrap();

            let (a, b) = tokio::join!(
                tokio::spawn({
                    let (c, j) = (coordinator.clone(), job.clone());
                    async move { c.clean(&j).await }
                }),
                tokio::spawn({
                    let (c, j) = (coordinator.clone(), job.clone());
                    async move { c.clean(&j).await }
                }),
            );
            let (a, b) = (a.unwrap(), b.unwrap());

            assert!(a.records_removed ^ b.records_removed, "round {round}: {a:?} / {b:?}");
            let loser = if a.records_removed { &b } else { &a };
            assert_eq!(loser.status, CleanupStatus::NotFound);
        }
    }

    #[tokio::test]
    async fn test_result_serializes_response_fields() {
        let artifacts = Arc::new(RecordingArtifacts::default());
        let (_registry, coordinator) = setup(artifacts);
        let result = tokio::time::timeout(Duration::from_secs(1), coordinator.clean(&JobId::new("x")))
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(json["evaluation"], "x");
        assert_eq!(json["records_removed"], false);
        assert!(json["errors"].is_array());
        assert!(json["messages"].is_array());
        assert!(json["removed_files"].is_array());
        assert!(json.get("status").is_none());
    }
}
