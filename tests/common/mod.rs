//! Shared utilities for integration tests.

use std::sync::Arc;

use hearth::config::{ListenerConfig, ServerConfig};
use hearth::resolver::memory::MemoryResolver;
use hearth::ServerCore;

/// Config binding an ephemeral loopback port.
#[allow(dead_code)]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        listener: ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..ListenerConfig::default()
        },
        ..ServerConfig::default()
    }
}

/// An 11-byte `hello world` document plus an HTML welcome page.
#[allow(dead_code)]
pub fn docs_resolver() -> MemoryResolver {
    MemoryResolver::new()
        .with_entry("file", b"hello world".to_vec(), "text/plain")
        .with_entry("index.html", b"<html>welcome</html>".to_vec(), "text/html")
        .with_welcome("index.html")
}

/// Start a server with the docs resolver mounted at `/docs/`.
#[allow(dead_code)]
pub async fn start_docs_server() -> (Arc<ServerCore>, String) {
    let server = Arc::new(ServerCore::new(test_config()));
    server
        .add_prefix(Some("/docs/"), Arc::new(docs_resolver()))
        .unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, format!("http://{addr}"))
}

/// Client that does not follow redirects, so 301s stay observable.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
