//! Demo binary: load a config file, mount the configured resolvers, and
//! serve until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hearth::cert::{CertManager, CommandProvider};
use hearth::config::load_config;
use hearth::resolver::registry::ResolverRegistry;
use hearth::ServerCore;

#[derive(Parser)]
#[command(name = "hearth", version, about = "Embedded HTTP/HTTPS serving core")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "hearth.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let registry = ResolverRegistry::new();
    let server = Arc::new(ServerCore::new(config.clone()));
    for route in &config.routes {
        let resolver = registry.create(&route.kind, route.args.as_ref())?;
        server.add_prefix(Some(&route.prefix), resolver)?;
        tracing::info!(prefix = %route.prefix, kind = %route.kind, "Mounted resolver");
    }

    let manager = match &config.cert {
        Some(cert_config) => {
            let provider = Arc::new(CommandProvider::new(cert_config.clone())?);
            let manager = Arc::new(CertManager::new(cert_config.clone(), provider));
            manager.ensure_material(&server).await?;
            manager.start_monitoring(Arc::clone(&server));
            Some(manager)
        }
        None => None,
    };

    server.start().await?;
    if let Some(addr) = server.local_addr() {
        tracing::info!(address = %addr, "Serving");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    if let Some(manager) = &manager {
        manager.stop_monitoring();
    }
    server
        .shutdown(Duration::from_secs(config.timeouts.stop_delay_secs))
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
