//! TLS material handling.
//!
//! # Responsibilities
//! - Locate PEM material inside the certificate store
//! - Load it into a `RustlsConfig` (the handle the listener serves from,
//!   and the vehicle for hot-swapping renewed material)
//! - Track the current certificate lease (validity window snapshot)
//! - Keep keystore passwords out of process memory after use

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use axum_server::tls_rustls::RustlsConfig;
use serde::{Deserialize, Serialize};

/// Paths to the PEM files for one certificate alias.
#[derive(Debug, Clone)]
pub struct MaterialPaths {
    /// Certificate chain, leaf first.
    pub cert: PathBuf,
    /// Private key.
    pub key: PathBuf,
}

impl MaterialPaths {
    /// Conventional layout inside a store directory:
    /// `<store>/<alias>.pem` and `<store>/<alias>.key`.
    pub fn in_store(store_dir: impl AsRef<Path>, alias: &str) -> Self {
        let store = store_dir.as_ref();
        Self {
            cert: store.join(format!("{alias}.pem")),
            key: store.join(format!("{alias}.key")),
        }
    }

    /// Sidecar file recording the lease window for this alias.
    pub fn lease(&self) -> PathBuf {
        self.cert.with_extension("lease.json")
    }

    pub fn exist(&self) -> bool {
        self.cert.is_file() && self.key.is_file()
    }
}

/// Snapshot of the currently installed certificate's validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateLease {
    pub alias: String,
    pub not_before: SystemTime,
    pub not_after: SystemTime,
    /// Whether intermediates accompanied the leaf.
    pub chain_present: bool,
}

impl CertificateLease {
    /// Validity remaining at `now`; zero once expired.
    pub fn remaining(&self, now: SystemTime) -> Duration {
        self.not_after.duration_since(now).unwrap_or(Duration::ZERO)
    }

    /// Total issued lifetime.
    pub fn lifetime(&self) -> Duration {
        self.not_after
            .duration_since(self.not_before)
            .unwrap_or(Duration::ZERO)
    }

    /// Read a lease sidecar; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match File::open(path) {
            Ok(file) => {
                let lease = serde_json::from_reader(BufReader::new(file))
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(lease))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the lease sidecar.
    pub fn store(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

/// Load the PEM material into a `RustlsConfig`.
pub async fn load_rustls(paths: &MaterialPaths) -> io::Result<RustlsConfig> {
    RustlsConfig::from_pem_file(&paths.cert, &paths.key).await
}

/// Whether the chain file carries intermediates beyond the leaf.
pub fn chain_present(cert_path: &Path) -> io::Result<bool> {
    let mut reader = BufReader::new(File::open(cert_path)?);
    let mut count = 0usize;
    for cert in rustls_pemfile::certs(&mut reader) {
        cert?;
        count += 1;
    }
    Ok(count > 1)
}

/// Password buffer that zeroes its contents on drop.
pub struct SecretBuf {
    bytes: Vec<u8>,
}

impl SecretBuf {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: secret.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The secret as UTF-8; empty when it is not valid UTF-8.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }

    fn zero(&mut self) {
        for byte in self.bytes.iter_mut() {
            // volatile so the wipe is not optimized away
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

impl Drop for SecretBuf {
    fn drop(&mut self) {
        self.zero();
    }
}

impl std::fmt::Debug for SecretBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretBuf(***)")
    }
}

impl From<String> for SecretBuf {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_layout_is_alias_based() {
        let paths = MaterialPaths::in_store("/srv/certs", "servercert");
        assert_eq!(paths.cert, PathBuf::from("/srv/certs/servercert.pem"));
        assert_eq!(paths.key, PathBuf::from("/srv/certs/servercert.key"));
        assert_eq!(
            paths.lease(),
            PathBuf::from("/srv/certs/servercert.lease.json")
        );
    }

    #[test]
    fn lease_sidecar_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servercert.lease.json");
        let lease = CertificateLease {
            alias: "servercert".into(),
            not_before: SystemTime::UNIX_EPOCH,
            not_after: SystemTime::UNIX_EPOCH + Duration::from_secs(86_400),
            chain_present: true,
        };
        lease.store(&path).unwrap();
        let loaded = CertificateLease::load(&path).unwrap().unwrap();
        assert_eq!(loaded.alias, "servercert");
        assert_eq!(loaded.lifetime(), Duration::from_secs(86_400));
    }

    #[test]
    fn missing_lease_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CertificateLease::load(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let lease = CertificateLease {
            alias: "a".into(),
            not_before: SystemTime::UNIX_EPOCH,
            not_after: SystemTime::UNIX_EPOCH + Duration::from_secs(10),
            chain_present: false,
        };
        let later = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        assert_eq!(lease.remaining(later), Duration::ZERO);
    }

    #[test]
    fn secret_is_zeroed() {
        let mut secret = SecretBuf::new(b"hunter2".to_vec());
        secret.zero();
        assert!(secret.as_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn chain_detection_counts_pem_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let single = dir.path().join("single.pem");
        let block = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        std::fs::write(&single, block).unwrap();
        assert!(!chain_present(&single).unwrap());

        let chained = dir.path().join("chain.pem");
        std::fs::write(&chained, format!("{block}{block}")).unwrap();
        assert!(chain_present(&chained).unwrap());
    }
}
