// crates/core/src/output.rs
//! Resolve an evaluation and a requested format into rendered output.

use std::sync::Arc;

use tracing::debug;

use crate::artifacts::{ArtifactStore, OutputFormat, WrittenOutput};
use crate::error::OutputError;
use crate::job::{clean_name, JobId};

/// Read-only with respect to the registry; callable at any lifecycle stage.
pub struct OutputRetriever {
    artifacts: Arc<dyn ArtifactStore>,
}

impl OutputRetriever {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }

    /// `format` is matched case-insensitively; `None` means JSON. An unknown
    /// format is rejected before the artifact store is touched.
    pub async fn get_output(
        &self,
        job: &JobId,
        format: Option<&str>,
    ) -> Result<WrittenOutput, OutputError> {
        let format = match format {
            Some(raw) => raw.parse::<OutputFormat>()?,
            None => OutputFormat::default(),
        };
        debug!(evaluation = %job, %format, "fetching output");
        Ok(self.artifacts.read_output(job, format).await?)
    }
}

/// Suggested download name: `<clean job name>.<extension>`.
pub fn download_filename(job: &JobId, output: &WrittenOutput) -> String {
    format!("{}.{}", clean_name(job.as_str()), output.extension)
}
