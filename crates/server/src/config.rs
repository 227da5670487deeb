// crates/server/src/config.rs
//! Command-line and environment configuration for the service binary.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use evalhub_core::KeyLayout;
use evalhub_storage::{S3Config, StorageConfig, StorageError};

use crate::tls::{TlsError, TlsPaths};

#[derive(Parser, Debug, Clone)]
#[command(name = "evalhub")]
#[command(version)]
#[command(about = "Evaluation job coordination service")]
pub struct Config {
    /// Listening address (must match the TLS certificate when TLS is used)
    #[arg(long, env = "EVALHUB_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Listening port
    #[arg(long, env = "EVALHUB_PORT", default_value_t = 3012)]
    pub port: u16,

    // === TLS Options ===
    /// Directory holding certificate.pem and privkey.pem
    #[arg(long, env = "EVALHUB_SSL_DIR")]
    pub ssl_dir: Option<PathBuf>,

    /// Path to a specific certificate file (PEM format)
    #[arg(long, env = "EVALHUB_CERT")]
    pub cert: Option<PathBuf>,

    /// Path to a specific private key file (PEM format)
    #[arg(long, env = "EVALHUB_KEY")]
    pub key: Option<PathBuf>,

    // === Registry Options ===
    /// Shared Redis instance; the registry is kept in memory when absent
    #[arg(long, env = "EVALHUB_REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix for every registry key
    #[arg(long, env = "EVALHUB_KEY_PREFIX", default_value = "")]
    pub key_prefix: String,

    /// Prefix for every job channel name
    #[arg(long, env = "EVALHUB_CHANNEL_PREFIX", default_value = "")]
    pub channel_prefix: String,

    // === Object Store Options ===
    /// Host of the S3-compatible object store
    #[arg(long, env = "EVALHUB_OBJECT_STORE_HOST", default_value = "minio_proxy")]
    pub object_store_host: String,

    /// Bucket holding evaluation artifacts
    #[arg(long, env = "EVALHUB_OBJECT_STORE_BUCKET", default_value = "evaluations")]
    pub object_store_bucket: String,

    /// File containing the object store access key
    #[arg(long, env = "EVALHUB_OBJECT_STORE_ACCESS_KEY_FILE")]
    pub object_store_access_key_file: Option<PathBuf>,

    /// File containing the object store secret key
    #[arg(long, env = "EVALHUB_OBJECT_STORE_SECRET_KEY_FILE")]
    pub object_store_secret_key_file: Option<PathBuf>,

    /// Keep artifacts on local disk under this directory instead of S3
    #[arg(long, env = "EVALHUB_OBJECT_STORE_ROOT", conflicts_with = "no_object_store")]
    pub object_store_root: Option<PathBuf>,

    /// Disable object store functionality and do not try to connect to one
    #[arg(long, env = "EVALHUB_NO_OBJECT_STORE")]
    pub no_object_store: bool,

    // === Background Checks ===
    /// Seconds between registry health pings
    #[arg(long, env = "EVALHUB_HEALTH_INTERVAL", default_value_t = 30)]
    pub health_interval_secs: u64,

    /// Seconds between orphaned artifact scans
    #[arg(long, env = "EVALHUB_ORPHAN_INTERVAL", default_value_t = 300)]
    pub orphan_interval_secs: u64,

    /// Seconds between bridge statistics reports
    #[arg(long, env = "EVALHUB_STATS_INTERVAL", default_value_t = 15)]
    pub stats_interval_secs: u64,

    /// Emit logs as JSON lines
    #[arg(long, env = "EVALHUB_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(self.key_prefix.clone(), self.channel_prefix.clone())
    }

    pub fn tls_paths(&self) -> Result<Option<TlsPaths>, TlsError> {
        TlsPaths::resolve(
            self.ssl_dir.as_deref(),
            self.cert.as_deref(),
            self.key.as_deref(),
        )
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn orphan_interval(&self) -> Duration {
        Duration::from_secs(self.orphan_interval_secs.max(1))
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs.max(1))
    }

    /// Artifact storage to attach, or `None` when it is switched off.
    ///
    /// The S3 backend needs both credential files; they are read here so a
    /// missing secret fails startup instead of the first cleanup.
    pub fn storage(&self) -> Result<Option<StorageConfig>, StorageError> {
        if self.no_object_store {
            return Ok(None);
        }
        if let Some(root) = &self.object_store_root {
            return Ok(Some(StorageConfig::filesystem(root)));
        }

        let (Some(access_file), Some(secret_file)) = (
            &self.object_store_access_key_file,
            &self.object_store_secret_key_file,
        ) else {
            return Err(StorageError::InvalidConfig(
                "object store credentials are required; pass both key files, \
                 --object-store-root, or --no-object-store"
                    .to_string(),
            ));
        };

        let access_key = std::fs::read_to_string(access_file)?;
        let secret_key = std::fs::read_to_string(secret_file)?;
        Ok(Some(StorageConfig::s3(S3Config::for_host(
            &self.object_store_host,
            self.object_store_bucket.clone(),
            access_key,
            secret_key,
        ))))
    }
}
