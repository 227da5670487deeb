// crates/core/src/registry.rs
//! Contract over the shared key-value store that tracks evaluation jobs.
//!
//! The store is the only source of truth. Nothing here takes an in-process
//! lock for correctness: concurrent cleanups are arbitrated by
//! [`JobRegistry::execute`], which every backend must run as one unit.

pub mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::job::{JobId, KeyLayout};
use crate::message::ChannelMessage;

/// The delete + publish pipeline run when a completed job is cleaned.
#[derive(Debug, Clone)]
pub struct CleanupBatch {
    pub job: JobId,
    /// Pointer keys observed before the batch was built. Backends also delete
    /// whatever the pointer set holds at execution time.
    pub keys: BTreeSet<String>,
    /// Published only if the deletion happens.
    pub notice: ChannelMessage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Keys deleted and notice published.
    Applied { deleted: usize },
    /// The job was already gone when the batch ran.
    Missing,
    /// The job exists but is not completed; nothing was touched.
    Incomplete,
}

#[async_trait]
pub trait JobRegistry: Send + Sync {
    fn layout(&self) -> &KeyLayout;

    async fn exists(&self, job: &JobId) -> Result<bool, RegistryError>;

    /// Absent jobs read as not completed.
    async fn get_completed(&self, job: &JobId) -> Result<bool, RegistryError>;

    /// Every key belonging to `job`, including its metadata key and the
    /// pointer set itself.
    async fn get_pointers(&self, job: &JobId) -> Result<BTreeSet<String>, RegistryError>;

    /// Delete `keys` as one batch. Returns how many existed.
    async fn delete_all(&self, keys: &BTreeSet<String>) -> Result<usize, RegistryError>;

    async fn publish(&self, message: &ChannelMessage) -> Result<(), RegistryError>;

    /// Run the guarded cleanup pipeline atomically: re-check that the job
    /// exists and is completed, delete its keys, publish the notice.
    async fn execute(&self, batch: &CleanupBatch) -> Result<BatchOutcome, RegistryError>;

    // Producer side.

    async fn register(&self, job: &JobId) -> Result<(), RegistryError>;

    async fn add_pointer(&self, job: &JobId, key: &str) -> Result<(), RegistryError>;

    async fn mark_completed(&self, job: &JobId) -> Result<(), RegistryError>;

    async fn ping(&self) -> Result<(), RegistryError>;
}
