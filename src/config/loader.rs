//! Configuration loading from disk.

use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::routing::PrefixRouter;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: ServerConfig = toml::from_str(&content)?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field rules serde cannot express.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    config
        .listener
        .bind_address
        .parse::<SocketAddr>()
        .map_err(|_| {
            ConfigError::Invalid(format!(
                "bind_address is not host:port: {}",
                config.listener.bind_address
            ))
        })?;
    if config.listener.backlog == 0 {
        return Err(ConfigError::Invalid("backlog must be at least 1".into()));
    }
    if config.listener.nthreads == Some(0) {
        return Err(ConfigError::Invalid("nthreads must be at least 1".into()));
    }

    let mut seen = HashSet::new();
    for route in &config.routes {
        if route.kind.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "route {} has no resolver kind",
                route.prefix
            )));
        }
        let normalized = PrefixRouter::normalize(Some(&route.prefix));
        if !seen.insert(normalized.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate route prefix: {normalized}"
            )));
        }
    }

    if let Some(cert) = &config.cert {
        if cert.domain.is_empty() {
            return Err(ConfigError::Invalid(
                "cert.domain is required when certificate management is enabled".into(),
            ));
        }
        if cert.validity_days == 0 {
            return Err(ConfigError::Invalid(
                "cert.validity_days must be at least 1".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn minimal_file_loads_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener]\nbind_address = \"127.0.0.1:0\"").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.listener.backlog, 32);
        assert!(config.list_prefixes);
    }

    #[test]
    fn bad_bind_address_is_rejected() {
        let config: ServerConfig =
            toml::from_str("[listener]\nbind_address = \"nonsense\"").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn duplicate_route_prefixes_are_rejected() {
        let config: ServerConfig = toml::from_str(
            r#"
            [[routes]]
            prefix = "/docs/"
            kind = "memory"

            [[routes]]
            prefix = "docs"
            kind = "memory"
            "#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn cert_section_requires_a_domain() {
        let config: ServerConfig = toml::from_str("[cert]\nalias = \"x\"").unwrap();
        assert!(validate(&config).is_err());
    }
}
