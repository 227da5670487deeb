// crates/core/src/artifacts.rs
//! Artifact store contract: rendered outputs and any other objects stored
//! for a job outside the registry.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::{ArtifactError, OutputError};
use crate::job::JobId;

/// Output formats a job's results can be rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
    NetCdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 3] = [OutputFormat::Json, OutputFormat::Csv, OutputFormat::NetCdf];

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::NetCdf => "nc",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Json => "application/json",
            OutputFormat::Csv => "text/csv",
            OutputFormat::NetCdf => "application/x-netcdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::NetCdf => write!(f, "netcdf"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "netcdf" | "nc" => Ok(OutputFormat::NetCdf),
            _ => Err(OutputError::UnknownFormat(raw.to_string())),
        }
    }
}

/// Rendered output ready to hand to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenOutput {
    pub raw_bytes: Bytes,
    /// No leading dot.
    pub extension: String,
    pub content_type: String,
}

impl WrittenOutput {
    pub fn new(format: OutputFormat, raw_bytes: impl Into<Bytes>) -> Self {
        Self {
            raw_bytes: raw_bytes.into(),
            extension: format.extension().to_string(),
            content_type: format.content_type().to_string(),
        }
    }
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// False when object storage was disabled at startup.
    fn is_available(&self) -> bool {
        true
    }

    /// Store a rendered output, returning the artifact name.
    async fn write_output(
        &self,
        job: &JobId,
        format: OutputFormat,
        raw_bytes: Bytes,
    ) -> Result<String, ArtifactError>;

    async fn read_output(
        &self,
        job: &JobId,
        format: OutputFormat,
    ) -> Result<WrittenOutput, ArtifactError>;

    /// Remove everything stored for `job`, returning the removed names in
    /// a stable order. A job with no artifacts yields an empty list.
    async fn remove_artifacts(&self, job: &JobId) -> Result<Vec<String>, ArtifactError>;

    /// Names of jobs that currently have stored artifacts.
    async fn list_jobs(&self) -> Result<Vec<String>, ArtifactError>;
}

/// Stand-in used when object storage is switched off; every operation
/// reports [`ArtifactError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledArtifacts;

#[async_trait]
impl ArtifactStore for DisabledArtifacts {
    fn is_available(&self) -> bool {
        false
    }

    async fn write_output(
        &self,
        _job: &JobId,
        _format: OutputFormat,
        _raw_bytes: Bytes,
    ) -> Result<String, ArtifactError> {
        Err(ArtifactError::Unavailable)
    }

    async fn read_output(
        &self,
        _job: &JobId,
        _format: OutputFormat,
    ) -> Result<WrittenOutput, ArtifactError> {
        Err(ArtifactError::Unavailable)
    }

    async fn remove_artifacts(&self, _job: &JobId) -> Result<Vec<String>, ArtifactError> {
        Err(ArtifactError::Unavailable)
    }

    async fn list_jobs(&self) -> Result<Vec<String>, ArtifactError> {
        Err(ArtifactError::Unavailable)
    }
}
