// crates/core/src/lib.rs
//! Evaluation job coordination: registry contract, channel bridge,
//! cleanup protocol and output retrieval.

pub mod artifacts;
pub mod bridge;
pub mod cleanup;
pub mod error;
pub mod job;
pub mod message;
pub mod output;
pub mod registry;

pub use artifacts::{ArtifactStore, DisabledArtifacts, OutputFormat, WrittenOutput};
pub use bridge::{BridgeConfig, ChannelBridge, Subscription};
pub use cleanup::{CleanupCoordinator, CleanupResult, CleanupStatus};
pub use error::*;
pub use job::{clean_name, is_valid_name, JobId, KeyLayout, CHANNEL_NAME_PATTERN, COMPLETE_FIELD};
pub use message::{ChannelMessage, Notice};
pub use output::{download_filename, OutputRetriever};
pub use registry::memory::MemoryRegistry;
pub use registry::{BatchOutcome, CleanupBatch, JobRegistry};
