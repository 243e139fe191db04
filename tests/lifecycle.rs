//! Lifecycle behavior across stop/start cycles.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{client, docs_resolver, test_config};
use hearth::routing::RouterError;
use hearth::server::{Lifecycle, ServerError};
use hearth::ServerCore;

#[tokio::test]
async fn restart_preserves_prefixes_and_keeps_serving() {
    let server = Arc::new(ServerCore::new(test_config()));
    server
        .add_prefix(Some("/docs/"), Arc::new(docs_resolver()))
        .unwrap();
    server.start().await.unwrap();

    server.stop(Duration::ZERO).await.unwrap();
    assert_eq!(server.lifecycle().await, Lifecycle::Idle);
    assert_eq!(server.prefixes(), vec!["/docs/".to_string()]);

    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    let res = client()
        .get(format!("http://{addr}/docs/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello world");
    server.shutdown(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn prefixes_added_between_runs_are_served_after_start() {
    let server = Arc::new(ServerCore::new(test_config()));
    server
        .add_prefix(Some("/docs/"), Arc::new(docs_resolver()))
        .unwrap();
    server.start().await.unwrap();
    server.stop(Duration::ZERO).await.unwrap();

    server
        .add_prefix(Some("/more/"), Arc::new(docs_resolver()))
        .unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    let res = client()
        .get(format!("http://{addr}/more/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    server.shutdown(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn duplicate_prefix_is_rejected() {
    let server = ServerCore::new(test_config());
    server
        .add_prefix(Some("/docs/"), Arc::new(docs_resolver()))
        .unwrap();
    let err = server
        .add_prefix(Some("docs"), Arc::new(docs_resolver()))
        .unwrap_err();
    assert!(matches!(err, RouterError::DuplicatePrefix(_)));
    assert_eq!(server.prefixes(), vec!["/docs/".to_string()]);
}

#[tokio::test]
async fn removed_prefix_stops_being_served() {
    let (server, base) = common::start_docs_server().await;
    assert!(server.remove_prefix(Some("/docs/")));
    let res = client()
        .get(format!("{base}/docs/file"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    server.shutdown(Duration::ZERO).await.unwrap();
}

#[tokio::test]
async fn shutdown_is_terminal_and_clears_the_table() {
    let server = ServerCore::new(test_config());
    server
        .add_prefix(Some("/docs/"), Arc::new(docs_resolver()))
        .unwrap();
    server.start().await.unwrap();
    server.shutdown(Duration::ZERO).await.unwrap();

    assert!(server.prefixes().is_empty());
    assert!(matches!(server.start().await, Err(ServerError::ShutDown)));
    assert!(matches!(
        server.add_prefix(Some("/x/"), Arc::new(docs_resolver())),
        Err(RouterError::ShutDown)
    ));
}

#[tokio::test]
async fn stop_and_shutdown_are_idempotent() {
    let server = ServerCore::new(test_config());
    server.stop(Duration::ZERO).await.unwrap();
    server.stop(Duration::ZERO).await.unwrap();
    server.shutdown(Duration::ZERO).await.unwrap();
    server.shutdown(Duration::ZERO).await.unwrap();
}
