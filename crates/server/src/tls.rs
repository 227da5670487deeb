// crates/server/src/tls.rs
//! TLS key material discovery and acceptor construction.
//!
//! The listener serves TLS when a certificate and private key are found,
//! either at explicit paths or under the SSL directory with the default
//! file names. With neither present it falls back to plain TCP.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

pub const DEFAULT_CERT_FILE: &str = "certificate.pem";
pub const DEFAULT_KEY_FILE: &str = "privkey.pem";

/// Error type for TLS configuration issues.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Certificate not found: {0}")]
    CertNotFound(PathBuf),

    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),

    #[error("No certificates in {0}")]
    NoCertificates(PathBuf),

    #[error("No private key in {0}")]
    NoPrivateKey(PathBuf),

    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Certificate and key locations that were found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl TlsPaths {
    /// Work out which key material to serve with.
    ///
    /// Explicit paths must exist. Default names under `ssl_dir` are used only
    /// when both files are there; if only one of them is, that is an error
    /// rather than a silent downgrade to plain TCP.
    pub fn resolve(
        ssl_dir: Option<&Path>,
        cert: Option<&Path>,
        key: Option<&Path>,
    ) -> Result<Option<Self>, TlsError> {
        let explicit = cert.is_some() || key.is_some();
        let cert = cert
            .map(Path::to_path_buf)
            .or_else(|| ssl_dir.map(|dir| dir.join(DEFAULT_CERT_FILE)));
        let key = key
            .map(Path::to_path_buf)
            .or_else(|| ssl_dir.map(|dir| dir.join(DEFAULT_KEY_FILE)));

        let (cert, key) = match (cert, key) {
            (Some(cert), Some(key)) => (cert, key),
            (Some(cert), None) => return Err(TlsError::KeyNotFound(cert.with_file_name(DEFAULT_KEY_FILE))),
            (None, Some(key)) => return Err(TlsError::CertNotFound(key.with_file_name(DEFAULT_CERT_FILE))),
            (None, None) => return Ok(None),
        };

        match (cert.exists(), key.exists()) {
            (true, true) => Ok(Some(Self { cert, key })),
            (false, false) if !explicit => Ok(None),
            (false, _) => Err(TlsError::CertNotFound(cert)),
            (true, false) => Err(TlsError::KeyNotFound(key)),
        }
    }

    /// Load the PEM files and build an acceptor backed by aws-lc-rs.
    pub fn acceptor(&self) -> Result<TlsAcceptor, TlsError> {
        let certs = load_certs(&self.cert)?;
        let key = load_key(&self.key)?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let mut config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_material_means_plain() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(TlsPaths::resolve(Some(dir.path()), None, None).unwrap(), None);
        assert_eq!(TlsPaths::resolve(None, None, None).unwrap(), None);
    }

    #[test]
    fn test_default_names_in_ssl_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CERT_FILE), "cert").unwrap();
        std::fs::write(dir.path().join(DEFAULT_KEY_FILE), "key").unwrap();

        let paths = TlsPaths::resolve(Some(dir.path()), None, None)
            .unwrap()
            .expect("both files present");
        assert_eq!(paths.cert, dir.path().join(DEFAULT_CERT_FILE));
        assert_eq!(paths.key, dir.path().join(DEFAULT_KEY_FILE));
    }

    #[test]
    fn test_half_present_material_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(DEFAULT_CERT_FILE), "cert").unwrap();

        let result = TlsPaths::resolve(Some(dir.path()), None, None);
        assert!(matches!(result, Err(TlsError::KeyNotFound(_))));
    }

    #[test]
    fn test_explicit_missing_cert_is_an_error() {
        let result = TlsPaths::resolve(
            None,
            Some(Path::new("/nonexistent/cert.pem")),
            Some(Path::new("/nonexistent/key.pem")),
        );
        assert!(matches!(result, Err(TlsError::CertNotFound(_))));
    }

    #[test]
    fn test_garbage_pem_has_no_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("c.pem");
        let key = dir.path().join("k.pem");
        std::fs::write(&cert, "not a pem").unwrap();
        std::fs::write(&key, "not a pem").unwrap();

        let paths = TlsPaths { cert, key };
        assert!(matches!(paths.acceptor(), Err(TlsError::NoCertificates(_))));
    }
}
