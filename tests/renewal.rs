//! Certificate renewal behavior with a scripted issuance command.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::test_config;
use hearth::cert::{CertManager, CommandProvider, MaterialError, MaterialProvider};
use hearth::config::CertConfig;
use hearth::tls::{CertificateLease, MaterialPaths};
use hearth::ServerCore;

const PEM_BLOCK: &str = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";

/// Write an issuance script that logs each invocation and drops PEM
/// files where the provider expects them.
fn write_issuer(dir: &Path, extra: &str) -> String {
    let script = dir.join("issue.sh");
    let body = format!(
        "#!/bin/sh\n\
         echo \"$1 $2 $3\" >> invocations.log\n\
         {extra}\n\
         printf '{pem}' > \"$1.pem\"\n\
         printf 'key-material' > \"$1.key\"\n\
         exit 0\n",
        pem = PEM_BLOCK.replace('\n', "\\n"),
    );
    std::fs::write(&script, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    script.display().to_string()
}

fn cert_config(store: &Path, command: String) -> CertConfig {
    CertConfig {
        domain: "example.test".into(),
        command: Some(command),
        password: Some("changeit".into()),
        store_dir: store.display().to_string(),
        ..CertConfig::default()
    }
}

fn invocations(store: &Path) -> usize {
    std::fs::read_to_string(store.join("invocations.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn issuance_passes_alias_validity_and_subject() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_issuer(dir.path(), "");
    let provider = CommandProvider::new(cert_config(dir.path(), command)).unwrap();

    let lease = provider.request_renewal().await.unwrap();
    assert_eq!(lease.alias, "servercert");
    assert!(!lease.chain_present);

    let log = std::fs::read_to_string(dir.path().join("invocations.log")).unwrap();
    assert_eq!(log.trim(), "servercert 90 CN=example.test");
    assert!(provider.material_paths().exist());
}

#[tokio::test]
async fn fresh_material_is_not_reissued() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_issuer(dir.path(), "");
    let provider = CommandProvider::new(cert_config(dir.path(), command)).unwrap();

    let paths = MaterialPaths::in_store(dir.path(), "servercert");
    std::fs::write(&paths.cert, PEM_BLOCK).unwrap();
    std::fs::write(&paths.key, "key-material").unwrap();
    let now = SystemTime::now();
    CertificateLease {
        alias: "servercert".into(),
        not_before: now,
        not_after: now + Duration::from_secs(90 * 86_400),
        chain_present: false,
    }
    .store(&paths.lease())
    .unwrap();

    provider.request_certificate().await.unwrap();
    assert_eq!(invocations(dir.path()), 0);
}

#[tokio::test]
async fn stale_material_is_reissued() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_issuer(dir.path(), "");
    let provider = CommandProvider::new(cert_config(dir.path(), command)).unwrap();

    let paths = MaterialPaths::in_store(dir.path(), "servercert");
    std::fs::write(&paths.cert, PEM_BLOCK).unwrap();
    std::fs::write(&paths.key, "key-material").unwrap();
    let now = SystemTime::now();
    // 5 days left of a 90-day lifetime: well under a third
    CertificateLease {
        alias: "servercert".into(),
        not_before: now - Duration::from_secs(85 * 86_400),
        not_after: now + Duration::from_secs(5 * 86_400),
        chain_present: false,
    }
    .store(&paths.lease())
    .unwrap();

    provider.request_certificate().await.unwrap();
    assert_eq!(invocations(dir.path()), 1);
}

#[tokio::test]
async fn failed_command_reports_its_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("issue.sh");
    std::fs::write(&script, "#!/bin/sh\nexit 3\n").unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
    let provider =
        CommandProvider::new(cert_config(dir.path(), script.display().to_string())).unwrap();
    assert!(matches!(
        provider.request_renewal().await,
        Err(MaterialError::CommandFailed(3))
    ));
}

#[tokio::test]
async fn manual_renewal_is_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    // slow issuance holds the in-flight gate open
    let command = write_issuer(dir.path(), "sleep 0.3");
    let provider = Arc::new(CommandProvider::new(cert_config(dir.path(), command)).unwrap());
    let manager = Arc::new(CertManager::new(
        cert_config(dir.path(), String::new()),
        provider,
    ));
    let server = Arc::new(ServerCore::new(test_config()));
    assert!(manager.start_monitoring(Arc::clone(&server)));

    assert!(manager.request_renewal_now());
    assert!(!manager.request_renewal_now());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(invocations(dir.path()), 1);

    // gate cleared; a new request goes through
    assert!(manager.request_renewal_now());
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(invocations(dir.path()), 2);
    manager.stop_monitoring();
}

#[tokio::test]
async fn monitoring_stops_idempotently_and_reattaches() {
    let dir = tempfile::tempdir().unwrap();
    let command = write_issuer(dir.path(), "");
    let provider = Arc::new(CommandProvider::new(cert_config(dir.path(), command)).unwrap());
    let manager = Arc::new(CertManager::new(
        cert_config(dir.path(), String::new()),
        provider,
    ));
    let server = Arc::new(ServerCore::new(test_config()));

    assert!(manager.start_monitoring(Arc::clone(&server)));
    assert!(!manager.start_monitoring(Arc::clone(&server)));
    assert!(manager.is_monitoring());

    manager.stop_monitoring();
    manager.stop_monitoring();
    assert!(!manager.is_monitoring());
    assert!(!manager.request_renewal_now());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(manager.start_monitoring(server));
    manager.stop_monitoring();
}
