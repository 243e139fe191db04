//! Certificate material providers.
//!
//! A [`MaterialProvider`] produces PEM material and a
//! [`CertificateLease`] describing its validity window. The in-tree
//! [`CommandProvider`] shells out to an external issuance tool; ACME or
//! CA-API providers implement the same trait outside this crate.

use std::io;
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::CertConfig;
use crate::tls::{chain_present, CertificateLease, MaterialPaths, SecretBuf};

/// Errors from certificate issuance.
#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("certificate domain is not configured")]
    MissingDomain,

    #[error("keystore password is not configured")]
    MissingPassword,

    #[error("no issuance command configured")]
    MissingCommand,

    #[error("issuance command exited with status {0}")]
    CommandFailed(i32),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Source of certificate material.
pub trait MaterialProvider: Send + Sync {
    /// Ensure valid material exists, reissuing only when the remaining
    /// validity has dropped below a third of the issued lifetime.
    fn request_certificate(&self) -> BoxFuture<'_, Result<CertificateLease, MaterialError>>;

    /// Reissue unconditionally.
    fn request_renewal(&self) -> BoxFuture<'_, Result<CertificateLease, MaterialError>>;

    /// Where this provider leaves the PEM material.
    fn material_paths(&self) -> MaterialPaths;
}

/// Provider that runs an external issuance program.
///
/// The program is invoked in the store directory with positional
/// arguments `<alias> <validity-days> <subject> <password>` and must
/// leave `<alias>.pem` and `<alias>.key` behind on success (exit 0).
pub struct CommandProvider {
    config: CertConfig,
    paths: MaterialPaths,
    password: Option<SecretBuf>,
}

impl CommandProvider {
    pub fn new(config: CertConfig) -> Result<Self, MaterialError> {
        if config.domain.is_empty() {
            return Err(MaterialError::MissingDomain);
        }
        let paths = MaterialPaths::in_store(&config.store_dir, &config.alias);
        let password = config.password.clone().map(SecretBuf::from);
        Ok(Self {
            config,
            paths,
            password,
        })
    }

    async fn issue(&self) -> Result<CertificateLease, MaterialError> {
        let command = self
            .config
            .command
            .as_deref()
            .ok_or(MaterialError::MissingCommand)?;
        let password = self
            .password
            .as_ref()
            .ok_or(MaterialError::MissingPassword)?;

        std::fs::create_dir_all(&self.config.store_dir)?;
        let subject = format!("CN={}", self.config.domain);
        debug!(command, alias = %self.config.alias, subject = %subject, "running issuance command");
        let status = Command::new(command)
            .arg(&self.config.alias)
            .arg(self.config.validity_days.to_string())
            .arg(&subject)
            .arg(password.as_str())
            .current_dir(&self.config.store_dir)
            .stdin(Stdio::null())
            .status()
            .await?;
        if !status.success() {
            return Err(MaterialError::CommandFailed(status.code().unwrap_or(-1)));
        }

        let now = SystemTime::now();
        let lease = CertificateLease {
            alias: self.config.alias.clone(),
            not_before: now,
            not_after: now + Duration::from_secs(u64::from(self.config.validity_days) * 86_400),
            chain_present: chain_present(&self.paths.cert)?,
        };
        lease.store(&self.paths.lease())?;
        info!(alias = %self.config.alias, "certificate issued");
        Ok(lease)
    }

    /// Existing lease, when the material is still on disk.
    fn current_lease(&self) -> Result<Option<CertificateLease>, MaterialError> {
        if !self.paths.exist() {
            return Ok(None);
        }
        Ok(CertificateLease::load(&self.paths.lease())?)
    }
}

impl MaterialProvider for CommandProvider {
    fn request_certificate(&self) -> BoxFuture<'_, Result<CertificateLease, MaterialError>> {
        Box::pin(async move {
            if let Some(lease) = self.current_lease()? {
                let remaining = lease.remaining(SystemTime::now());
                if remaining > lease.lifetime() / 3 {
                    debug!(
                        alias = %lease.alias,
                        remaining_secs = remaining.as_secs(),
                        "existing certificate still fresh, skipping issuance"
                    );
                    return Ok(lease);
                }
                warn!(alias = %lease.alias, "existing certificate near expiry, reissuing");
            }
            self.issue().await
        })
    }

    fn request_renewal(&self) -> BoxFuture<'_, Result<CertificateLease, MaterialError>> {
        Box::pin(self.issue())
    }

    fn material_paths(&self) -> MaterialPaths {
        self.paths.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> CertConfig {
        CertConfig {
            domain: "example.test".into(),
            command: Some("/bin/true".into()),
            password: Some("changeit".into()),
            store_dir: dir.display().to_string(),
            ..CertConfig::default()
        }
    }

    #[test]
    fn missing_domain_is_rejected() {
        let cfg = CertConfig::default();
        assert!(matches!(
            CommandProvider::new(cfg),
            Err(MaterialError::MissingDomain)
        ));
    }

    #[tokio::test]
    async fn missing_command_fails_issuance() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.command = None;
        let provider = CommandProvider::new(cfg).unwrap();
        assert!(matches!(
            provider.request_renewal().await,
            Err(MaterialError::MissingCommand)
        ));
    }

    #[tokio::test]
    async fn missing_password_fails_issuance() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.password = None;
        let provider = CommandProvider::new(cfg).unwrap();
        assert!(matches!(
            provider.request_renewal().await,
            Err(MaterialError::MissingPassword)
        ));
    }

    #[tokio::test]
    async fn failing_command_surfaces_its_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.command = Some("/bin/false".into());
        let provider = CommandProvider::new(cfg).unwrap();
        assert!(matches!(
            provider.request_renewal().await,
            Err(MaterialError::CommandFailed(1))
        ));
    }

    #[tokio::test]
    async fn fresh_lease_skips_reissuance() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        // a command that would fail if it ran
        cfg.command = Some("/bin/false".into());
        let provider = CommandProvider::new(cfg).unwrap();

        let paths = provider.material_paths();
        std::fs::write(&paths.cert, "cert").unwrap();
        std::fs::write(&paths.key, "key").unwrap();
        let now = SystemTime::now();
        let lease = CertificateLease {
            alias: "servercert".into(),
            not_before: now,
            not_after: now + Duration::from_secs(90 * 86_400),
            chain_present: false,
        };
        lease.store(&paths.lease()).unwrap();

        let result = provider.request_certificate().await.unwrap();
        assert_eq!(result.alias, "servercert");
    }
}
