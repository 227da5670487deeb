// crates/storage/src/lib.rs
//! Evaluation artifact storage on top of `object_store`.
//!
//! - S3-compatible storage (MinIO behind a proxy in deployments)
//! - On-disk storage for local runs
//! - In-memory storage for tests
//!
//! Layout: `{prefix}/{job}/{job}.{extension}` for rendered outputs; anything
//! else a writer drops under `{prefix}/{job}/` belongs to the job as well and
//! is removed with it.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use evalhub_core::{
    clean_name, ArtifactError, ArtifactStore, JobId, OutputFormat, WrittenOutput,
};
use futures_util::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;
use object_store::ObjectStoreExt;
use tracing::{debug, info};

pub const DEFAULT_PREFIX: &str = "evaluations";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object_store error: {0}")]
    ObjectStore(#[from] object_store::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    /// MinIO-style object store reached by host name, e.g. `minio_proxy`.
    /// The host may carry a scheme and port; plain hosts get `http://` and
    /// port 9000.
    pub fn for_host(
        host: &str,
        bucket: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        let host = host.trim();
        let endpoint = if host.contains("://") {
            host.to_string()
        } else if host.contains(':') {
            format!("http://{host}")
        } else {
            format!("http://{host}:9000")
        };
        Self {
            bucket: bucket.into(),
            region: "us-east-1".to_string(),
            endpoint: Some(endpoint),
            access_key_id: Some(access_key_id.into().trim().to_string()),
            secret_access_key: Some(secret_access_key.into().trim().to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Key prefix under which every job's artifacts live.
    pub prefix: String,
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

/// [`ArtifactStore`] backed by any `object_store` implementation.
#[derive(Clone)]
pub struct ObjectArtifactStore {
    kind: StorageKind,
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectArtifactStore {
    pub fn new(cfg: StorageConfig) -> Result<Self, StorageError> {
        let (kind, store) = match cfg.backend {
            StorageBackendConfig::S3(s3) => (StorageKind::S3, Arc::new(build_s3(s3)?) as _),
            StorageBackendConfig::Filesystem { root } => {
                ensure_dir(&root)?;
                let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)?;
                (StorageKind::Filesystem, Arc::new(fs) as _)
            }
            StorageBackendConfig::Memory => {
                let mem = object_store::memory::InMemory::new();
                (StorageKind::Memory, Arc::new(mem) as _)
            }
        };

        let prefix = cfg.prefix.trim_matches('/').to_string();
        if prefix.is_empty() {
            return Err(StorageError::InvalidConfig(
                "artifact prefix must not be empty".to_string(),
            ));
        }

        info!(kind = kind.as_str(), prefix = %prefix, "artifact store ready");
        Ok(Self {
            kind,
            store,
            prefix,
        })
    }

    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    fn job_dir(&self, job: &JobId) -> Path {
        Path::from(format!("{}/{}", self.prefix, clean_name(job.as_str())))
    }

    fn output_path(&self, job: &JobId, format: OutputFormat) -> Path {
        let name = clean_name(job.as_str());
        Path::from(format!("{}/{name}/{name}.{}", self.prefix, format.extension()))
    }
}

fn backend_error(err: object_store::Error) -> ArtifactError {
    ArtifactError::Backend(err.to_string())
}

#[async_trait]
impl ArtifactStore for ObjectArtifactStore {
    async fn write_output(
        &self,
        job: &JobId,
        format: OutputFormat,
        raw_bytes: Bytes,
    ) -> Result<String, ArtifactError> {
        let path = self.output_path(job, format);
        self.store
            .put(&path, object_store::PutPayload::from(raw_bytes))
            .await
            .map_err(backend_error)?;
        debug!(evaluation = %job, path = %path, "output written");
        Ok(path.to_string())
    }

    async fn read_output(
        &self,
        job: &JobId,
        format: OutputFormat,
    ) -> Result<WrittenOutput, ArtifactError> {
        let path = self.output_path(job, format);
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => {
                return Err(ArtifactError::NotFound {
                    job: job.to_string(),
                    format: format.to_string(),
                })
            }
            Err(e) => return Err(backend_error(e)),
        };
        let raw_bytes = result.bytes().await.map_err(backend_error)?;
        Ok(WrittenOutput::new(format, raw_bytes))
    }

    async fn remove_artifacts(&self, job: &JobId) -> Result<Vec<String>, ArtifactError> {
        let dir = self.job_dir(job);
        let objects: Vec<object_store::ObjectMeta> = self
            .store
            .list(Some(&dir))
            .try_collect()
            .await
            .map_err(backend_error)?;

        let mut removed = Vec::with_capacity(objects.len());
        for meta in objects {
            match self.store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {
                    removed.push(meta.location.to_string());
                }
                Err(e) => return Err(backend_error(e)),
            }
        }
        removed.sort();
        info!(evaluation = %job, removed = removed.len(), "artifacts removed");
        Ok(removed)
    }

    async fn list_jobs(&self) -> Result<Vec<String>, ArtifactError> {
        let root = Path::from(self.prefix.as_str());
        let listing = self
            .store
            .list_with_delimiter(Some(&root))
            .await
            .map_err(backend_error)?;
        let mut jobs: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        jobs.sort();
        Ok(jobs)
    }
}

fn ensure_dir(root: &FsPath) -> Result<(), StorageError> {
    std::fs::create_dir_all(root)?;
    Ok(())
}

fn build_s3(cfg: S3Config) -> Result<object_store::aws::AmazonS3, StorageError> {
    let mut builder = object_store::aws::AmazonS3Builder::new()
        .with_bucket_name(cfg.bucket)
        .with_region(cfg.region);

    if let Some(endpoint) = cfg.endpoint {
        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
        builder = builder.with_endpoint(endpoint);
    }
    if let Some(access_key_id) = cfg.access_key_id {
        builder = builder.with_access_key_id(access_key_id);
    }
    if let Some(secret_access_key) = cfg.secret_access_key {
        builder = builder.with_secret_access_key(secret_access_key);
    }

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn in_memory_output_round_trip() {
        let store = ObjectArtifactStore::new(StorageConfig::memory()).unwrap();
        let job = JobId::new("eval-42");

        let name = store
            .write_output(&job, OutputFormat::Csv, Bytes::from("a,b\n"))
            .await
            .unwrap();
        assert_eq!(name, "evaluations/eval-42/eval-42.csv");

        let out = store.read_output(&job, OutputFormat::Csv).await.unwrap();
        assert_eq!(out.content_type, "text/csv");
        assert_eq!(out.raw_bytes, Bytes::from("a,b\n"));
    }

    #[tokio::test]
    async fn missing_output_is_not_found() {
        let store = ObjectArtifactStore::new(StorageConfig::memory()).unwrap();
        let err = store
            .read_output(&JobId::new("nope"), OutputFormat::Json)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound { .. }));
    }

    #[tokio::test]
    async fn remove_only_touches_one_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectArtifactStore::new(StorageConfig::filesystem(dir.path())).unwrap();
        let a = JobId::new("eval-a");
        let b = JobId::new("eval-b");
        store.write_output(&a, OutputFormat::Json, Bytes::from("{}")).await.unwrap();
        store.write_output(&a, OutputFormat::Csv, Bytes::from("x")).await.unwrap();
        store.write_output(&b, OutputFormat::Json, Bytes::from("{}")).await.unwrap();

        assert_eq!(store.list_jobs().await.unwrap(), vec!["eval-a", "eval-b"]);

        let removed = store.remove_artifacts(&a).await.unwrap();
        assert_eq!(
            removed,
            vec![
                "evaluations/eval-a/eval-a.csv".to_string(),
                "evaluations/eval-a/eval-a.json".to_string(),
            ]
        );
        assert!(store.read_output(&b, OutputFormat::Json).await.is_ok());
        assert!(store.remove_artifacts(&a).await.unwrap().is_empty());
    }

    #[test]
    fn s3_config_for_bare_host_uses_minio_port() {
        let cfg = S3Config::for_host("minio_proxy", "evaluations", "user\n", "secret\n");
        assert_eq!(cfg.endpoint.as_deref(), Some("http://minio_proxy:9000"));
        assert_eq!(cfg.access_key_id.as_deref(), Some("user"));
        assert_eq!(cfg.secret_access_key.as_deref(), Some("secret"));

        let cfg = S3Config::for_host("https://objects.example.com", "b", "u", "s");
        assert_eq!(cfg.endpoint.as_deref(), Some("https://objects.example.com"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let cfg = StorageConfig {
            prefix: "/".to_string(),
            ..StorageConfig::memory()
        };
        assert!(matches!(
            ObjectArtifactStore::new(cfg),
            Err(StorageError::InvalidConfig(_))
        ));
    }
}
