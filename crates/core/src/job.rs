// crates/core/src/job.rs
//
// Job identity, name validation and the shared-store key layout.

use std::fmt;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::NameError;

/// Names accepted for evaluations and their channels.
pub const CHANNEL_NAME_PATTERN: &str = r"^[A-Za-z0-9_.\-]{1,128}$";

/// Hash field on the metadata key that carries the completion flag.
pub const COMPLETE_FIELD: &str = "complete";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CHANNEL_NAME_PATTERN).expect("valid channel name pattern"));

/// Whether `name` is usable as an evaluation id or channel name.
pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`, making the
/// name safe for file names and object keys.
pub fn clean_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Opaque, creator-supplied identity of an evaluation job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an id without validating it. Use [`JobId::parse`] at boundaries.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate a client-supplied id.
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        if !is_valid_name(trimmed) {
            return Err(NameError::Invalid(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// KeyLayout
// ---------------------------------------------------------------------------

/// Deterministic mapping from a job to its store keys and channel name.
///
/// Per job the store holds a metadata hash (`{prefix}{job}:meta`, field
/// [`COMPLETE_FIELD`]) and a pointer set (`{prefix}{job}:pointers`). The
/// channel is `{channel_prefix}{job}` and is never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLayout {
    key_prefix: String,
    channel_prefix: String,
}

impl KeyLayout {
    pub fn new(key_prefix: impl Into<String>, channel_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            channel_prefix: channel_prefix.into(),
        }
    }

    pub fn meta_key(&self, job: &JobId) -> String {
        format!("{}{}:meta", self.key_prefix, job)
    }

    pub fn pointers_key(&self, job: &JobId) -> String {
        format!("{}{}:pointers", self.key_prefix, job)
    }

    pub fn channel_name(&self, job: &JobId) -> String {
        format!("{}{}", self.channel_prefix, job)
    }

    pub fn channel_prefix(&self) -> &str {
        &self.channel_prefix
    }

    /// Channel on which the registry names job channels it has closed. The
    /// `:` keeps it outside [`CHANNEL_NAME_PATTERN`], so no relay can attach
    /// to it or publish on it.
    pub fn control_channel(&self) -> String {
        format!("{}evalhub:closed", self.channel_prefix)
    }

    /// Inverse of [`KeyLayout::channel_name`].
    pub fn job_for_channel(&self, channel: &str) -> Option<JobId> {
        channel
            .strip_prefix(self.channel_prefix.as_str())
            .filter(|rest| !rest.is_empty())
            .map(JobId::new)
    }
}

/// Interpret a stored completion flag.
pub(crate) fn parse_flag(raw: Option<&str>) -> bool {
    match raw {
        Some(value) => {
            let value = value.trim();
            value == "1" || value.eq_ignore_ascii_case("true")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_parse() {
        assert_eq!(JobId::parse("eval-42").unwrap().as_str(), "eval-42");
        assert_eq!(JobId::parse("  eval.7_b ").unwrap().as_str(), "eval.7_b");
        assert_eq!(JobId::parse("   "), Err(NameError::Empty));
        assert!(matches!(JobId::parse("eval 42"), Err(NameError::Invalid(_))));
        assert!(matches!(JobId::parse("a/b"), Err(NameError::Invalid(_))));
        assert!(matches!(JobId::parse(&"x".repeat(129)), Err(NameError::Invalid(_))));
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("eval-42"), "eval-42");
        assert_eq!(clean_name("my eval/run:1"), "my_eval_run_1");
        assert_eq!(clean_name(""), "_");
    }

    #[test]
    fn test_key_layout_defaults() {
        let layout = KeyLayout::default();
        let job = JobId::new("eval-42");
        assert_eq!(layout.meta_key(&job), "eval-42:meta");
        assert_eq!(layout.pointers_key(&job), "eval-42:pointers");
        assert_eq!(layout.channel_name(&job), "eval-42");
    }

    #[test]
    fn test_key_layout_prefixes() {
        let layout = KeyLayout::new("evaluations:", "progress.");
        let job = JobId::new("run1");
        assert_eq!(layout.meta_key(&job), "evaluations:run1:meta");
        assert_eq!(layout.channel_name(&job), "progress.run1");
        assert_eq!(layout.job_for_channel("progress.run1"), Some(job));
        assert_eq!(layout.job_for_channel("other.run1"), None);
        assert_eq!(layout.job_for_channel("progress."), None);
        assert_eq!(layout.control_channel(), "progress.evalhub:closed");
        assert!(!is_valid_name(&layout.control_channel()));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some("1")));
        assert!(parse_flag(Some("True")));
        assert!(!parse_flag(Some("0")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(None));
    }
}
