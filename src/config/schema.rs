//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! server. All types derive Serde traits for deserialization from config
//! files; every field has a default so a minimal file works.

use serde::{Deserialize, Serialize};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, backlog, workers).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Optional TLS material (static; certificate management can
    /// replace it at runtime).
    pub tls: Option<TlsConfig>,

    /// Optional certificate lifecycle management.
    pub cert: Option<CertConfig>,

    /// Prefix → resolver mounts created at startup.
    pub routes: Vec<RouteConfig>,

    /// Serve an HTML listing of mounted prefixes at `/`.
    pub list_prefixes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            tls: None,
            cert: None,
            routes: Vec::new(),
            list_prefixes: true,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080"). Port 0 picks a free port.
    pub bind_address: String,

    /// Accept backlog hint; also feeds the worker-count heuristic.
    pub backlog: u32,

    /// Explicit worker bound; overrides the backlog heuristic.
    pub nthreads: Option<usize>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            backlog: 32,
            nthreads: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request timeout in seconds.
    pub request_secs: u64,

    /// Grace window for in-flight requests when stopping.
    pub stop_delay_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            stop_delay_secs: 5,
        }
    }
}

/// TLS material for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate chain file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Certificate lifecycle management.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CertConfig {
    /// Domain the certificate is issued for.
    pub domain: String,

    /// Contact address passed to the issuance tool.
    pub email: Option<String>,

    /// Alias naming the certificate in the store.
    pub alias: String,

    /// Requested validity in days.
    pub validity_days: u32,

    /// Offset in seconds added to the midnight baseline for the first
    /// scheduled check.
    pub time_offset_secs: i64,

    /// Days between scheduled checks. Zero selects a 60-second interval
    /// for test runs.
    pub interval_days: u32,

    /// Grace window for the restart performed after a renewal.
    pub stop_delay_secs: u64,

    /// External issuance program; receives alias, validity, subject and
    /// password as positional arguments.
    pub command: Option<String>,

    /// Directory holding the PEM material and lease metadata.
    pub store_dir: String,

    /// Keystore password handed to the issuance program.
    pub password: Option<String>,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            email: None,
            alias: "servercert".to_string(),
            validity_days: 90,
            time_offset_secs: 0,
            interval_days: 5,
            stop_delay_secs: 3,
            command: None,
            store_dir: "certs".to_string(),
            password: None,
        }
    }
}

/// A prefix mount created at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Prefix to mount under; normalized to `/…/` form.
    pub prefix: String,

    /// Resolver kind, looked up in the factory registry.
    pub kind: String,

    /// Kind-specific arguments passed to the factory.
    pub args: Option<toml::Value>,
}
