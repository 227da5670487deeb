// crates/core/src/message.rs
//! Channel payloads. Producer payloads are opaque; only the notices the
//! cleanup protocol emits carry a small JSON envelope.

use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// One publication on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

impl ChannelMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// True when the payload is an `evaluation_removed` notice.
    ///
    /// Describes content only. Anyone able to publish can produce such a
    /// payload; channels end through [`crate::ChannelBridge::close`].
    pub fn is_termination(&self) -> bool {
        // Cheap reject before parsing arbitrary producer payloads.
        if !self.payload.contains("evaluation_removed") {
            return false;
        }
        matches!(
            Notice::parse(&self.payload),
            Some(Notice::EvaluationRemoved { .. })
        )
    }
}

/// Notices published by the cleanup protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    EvaluationRemoved { evaluation: String, message: String },
    EvaluationNotFound { evaluation: String, message: String },
}

impl Notice {
    pub fn removed(job: &JobId) -> Self {
        Self::EvaluationRemoved {
            evaluation: job.to_string(),
            message: format!("Removed '{job}' as requested"),
        }
    }

    pub fn not_found(job: &JobId, message: impl Into<String>) -> Self {
        Self::EvaluationNotFound {
            evaluation: job.to_string(),
            message: message.into(),
        }
    }

    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn parse(payload: &str) -> Option<Self> {
        serde_json::from_str(payload).ok()
    }
}
