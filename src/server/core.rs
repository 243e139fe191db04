//! Restartable server core.
//!
//! # Responsibilities
//! - Own the lifecycle: Idle → Running ⇄ Stopping → Idle, terminal ShutDown
//! - Build the Axum router and middleware stack on every start
//! - Dispatch requests through the prefix router and pipeline
//! - Serialize lifecycle transitions behind one coarse lock
//!
//! # Design Decisions
//! - The restart lock is a `tokio::sync::Mutex`; holders get an
//!   [`ExclusiveCore`] guard, so "stop, swap material, start" happens as
//!   one critical section without exposing the lock itself
//! - A fresh `axum_server::Handle` per start keeps stop/start cycles
//!   independent; a finished handle is never reused
//! - Worker concurrency is bounded by `ceil(log8(backlog))` capped at the
//!   machine's parallelism, unless the config pins a count

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use axum::routing::any;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::http::auth::Authenticator;
use crate::http::Pipeline;
use crate::resolver::{default_error_page, Payload, ResolveError, Resolver};
use crate::routing::root::{fallback, RootOutcome};
use crate::routing::{PrefixRouter, RouterError};
use crate::tls::MaterialPaths;

/// Errors from lifecycle operations.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called while a stop is still in progress.
    #[error("server is stopping; wait for it to reach idle")]
    Stopping,

    /// The core has been shut down and cannot be restarted.
    #[error("server has been shut down")]
    ShutDown,

    #[error("invalid bind address: {0}")]
    BadAddress(String),

    #[error("failed to bind listener: {0}")]
    Bind(io::Error),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Lifecycle states of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Running,
    Stopping,
    ShutDown,
}

struct Inner {
    lifecycle: Lifecycle,
    handle: Option<Handle>,
    task: Option<JoinHandle<io::Result<()>>>,
    tls: Option<RustlsConfig>,
}

/// State shared with request handlers.
#[derive(Clone)]
struct AppState {
    router: Arc<PrefixRouter>,
    pipeline: Pipeline,
    list_prefixes: bool,
}

/// The restartable serving core.
pub struct ServerCore {
    config: ServerConfig,
    router: Arc<PrefixRouter>,
    pipeline: Pipeline,
    inner: Mutex<Inner>,
    local_addr: ArcSwapOption<SocketAddr>,
}

impl ServerCore {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            router: Arc::new(PrefixRouter::new()),
            pipeline: Pipeline::new(),
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Idle,
                handle: None,
                task: None,
                tls: None,
            }),
            local_addr: ArcSwapOption::empty(),
        }
    }

    /// Mount a resolver under a prefix. Safe in any lifecycle state
    /// except after shutdown; while stopping the mount is queued.
    pub fn add_prefix(
        &self,
        prefix: Option<&str>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<String, RouterError> {
        self.router.add(prefix, resolver)
    }

    /// Mount a resolver guarded by an authenticator.
    pub fn add_prefix_with_auth(
        &self,
        prefix: Option<&str>,
        resolver: Arc<dyn Resolver>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<String, RouterError> {
        self.router.add_with_auth(prefix, resolver, authenticator)
    }

    /// Unmount a prefix, deconfiguring its resolver.
    pub fn remove_prefix(&self, prefix: Option<&str>) -> bool {
        self.router.remove(prefix)
    }

    /// Currently mounted prefixes.
    pub fn prefixes(&self) -> Vec<String> {
        self.router.prefixes()
    }

    /// The bound address once running; `None` otherwise. With port 0 in
    /// the config this is where the kernel-chosen port shows up.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.load().as_deref().copied()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Acquire the lifecycle lock. Everything done through the returned
    /// guard is one critical section; renewal uses this to stop, swap
    /// material, and start without another caller interleaving.
    pub async fn exclusive(&self) -> ExclusiveCore<'_> {
        ExclusiveCore {
            core: self,
            inner: self.inner.lock().await,
        }
    }

    pub async fn start(&self) -> Result<(), ServerError> {
        self.exclusive().await.start().await
    }

    pub async fn stop(&self, delay: Duration) -> Result<(), ServerError> {
        self.exclusive().await.stop(delay).await
    }

    pub async fn shutdown(&self, delay: Duration) -> Result<(), ServerError> {
        self.exclusive().await.shutdown(delay).await
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.inner.lock().await.lifecycle
    }
}

/// Holder of the lifecycle lock.
pub struct ExclusiveCore<'a> {
    core: &'a ServerCore,
    inner: MutexGuard<'a, Inner>,
}

impl ExclusiveCore<'_> {
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle == Lifecycle::Running
    }

    /// Start serving. A no-op when already running; an error while
    /// stopping or after shutdown.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        match self.inner.lifecycle {
            Lifecycle::Running => {
                debug!("start called while running; nothing to do");
                return Ok(());
            }
            Lifecycle::Stopping => return Err(ServerError::Stopping),
            Lifecycle::ShutDown => return Err(ServerError::ShutDown),
            Lifecycle::Idle => {}
        }

        let config = &self.core.config;
        let addr: SocketAddr = config
            .listener
            .bind_address
            .parse()
            .map_err(|_| ServerError::BadAddress(config.listener.bind_address.clone()))?;

        self.core.router.activate_pending();
        if let Err(err) = self.core.router.configure_all() {
            self.core.router.deconfigure_all();
            return Err(err.into());
        }

        // static TLS material from the config, loaded once
        if self.inner.tls.is_none() {
            if let Some(tls) = &config.tls {
                let paths = MaterialPaths {
                    cert: tls.cert_path.clone().into(),
                    key: tls.key_path.clone().into(),
                };
                self.inner.tls = Some(crate::tls::load_rustls(&paths).await?);
            }
        }

        let workers = config
            .listener
            .nthreads
            .unwrap_or_else(|| pool_threads(config.listener.backlog));
        let state = AppState {
            router: Arc::clone(&self.core.router),
            pipeline: self.core.pipeline.clone(),
            list_prefixes: config.list_prefixes,
        };
        let app = Router::new()
            .route("/{*path}", any(dispatch))
            .route("/", any(dispatch))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.timeouts.request_secs,
            )))
            .layer(GlobalConcurrencyLimitLayer::new(workers))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http());

        let handle = Handle::new();
        let task = match self.inner.tls.clone() {
            Some(rustls) => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    axum_server::bind_rustls(addr, rustls)
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                })
            }
            None => {
                let handle = handle.clone();
                tokio::spawn(async move {
                    axum_server::bind(addr)
                        .handle(handle)
                        .serve(app.into_make_service())
                        .await
                })
            }
        };

        let Some(bound) = handle.listening().await else {
            // the serve task exited before listening; surface its error
            let err = match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => io::Error::other("listener closed before binding"),
                Err(join) => io::Error::other(join),
            };
            self.core.router.deconfigure_all();
            return Err(ServerError::Bind(err));
        };

        info!(address = %bound, workers, "server started");
        self.core.local_addr.store(Some(Arc::new(bound)));
        self.inner.handle = Some(handle);
        self.inner.task = Some(task);
        self.inner.lifecycle = Lifecycle::Running;
        Ok(())
    }

    /// Stop serving, waiting up to `delay` for in-flight requests. The
    /// core returns to Idle and can be started again. A no-op when not
    /// running.
    pub async fn stop(&mut self, delay: Duration) -> Result<(), ServerError> {
        if self.inner.lifecycle != Lifecycle::Running {
            debug!("stop called while not running; nothing to do");
            return Ok(());
        }
        self.wind_down(delay).await?;
        self.core.router.set_stopping(false);
        self.core.router.activate_pending();
        self.inner.lifecycle = Lifecycle::Idle;
        info!("server stopped");
        Ok(())
    }

    /// Terminal shutdown: stop if running, then clear the prefix table.
    pub async fn shutdown(&mut self, delay: Duration) -> Result<(), ServerError> {
        if self.inner.lifecycle == Lifecycle::ShutDown {
            return Ok(());
        }
        if self.inner.lifecycle == Lifecycle::Running {
            self.wind_down(delay).await?;
        }
        self.core.router.clear();
        self.inner.lifecycle = Lifecycle::ShutDown;
        info!("server shut down");
        Ok(())
    }

    /// Load new PEM material into the listener's TLS config. When one is
    /// already installed this is a hot swap; new handshakes see the new
    /// certificate.
    pub async fn install_material(&mut self, paths: &MaterialPaths) -> Result<(), ServerError> {
        match &self.inner.tls {
            Some(rustls) => {
                rustls
                    .reload_from_pem_file(&paths.cert, &paths.key)
                    .await?;
                info!(cert = %paths.cert.display(), "TLS material reloaded");
            }
            None => {
                self.inner.tls = Some(crate::tls::load_rustls(paths).await?);
                info!(cert = %paths.cert.display(), "TLS material installed");
            }
        }
        Ok(())
    }

    async fn wind_down(&mut self, delay: Duration) -> Result<(), ServerError> {
        self.inner.lifecycle = Lifecycle::Stopping;
        self.core.router.set_stopping(true);
        if let Some(handle) = self.inner.handle.take() {
            handle.graceful_shutdown(Some(delay));
        }
        if let Some(task) = self.inner.task.take() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "serve task ended with an error"),
                Err(e) => warn!(error = %e, "serve task panicked"),
            }
        }
        self.core.local_addr.store(None);
        self.core.router.deconfigure_all();
        Ok(())
    }
}

/// Worker bound: `ceil(log8(backlog))`, at least 1, capped at the
/// machine's parallelism.
pub fn pool_threads(backlog: u32) -> usize {
    let max = std::thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1);
    let backlog = backlog.max(1) as f64;
    let threads = (backlog.ln() / 8f64.ln()).ceil() as usize;
    threads.clamp(1, max)
}

/// Catch-all handler: TRACE echo, then prefix lookup, then root fallback.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    if request.method() == Method::TRACE {
        return trace_echo(&request);
    }
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    match state.router.lookup(&path) {
        Some(matched) => state.pipeline.handle(matched, request).await,
        None => root_response(&state, &path, query.as_deref()),
    }
}

/// Echo the request line and headers back as `message/http`.
fn trace_echo(request: &Request<Body>) -> Response<Body> {
    let mut echo = format!(
        "{} {} {:?}\r\n",
        request.method(),
        request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/"),
        request.version(),
    );
    for (name, value) in request.headers() {
        echo.push_str(name.as_str());
        echo.push_str(": ");
        echo.push_str(value.to_str().unwrap_or(""));
        echo.push_str("\r\n");
    }
    let mut response = Response::new(Body::from(echo));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("message/http"),
    );
    response
}

fn root_response(state: &AppState, path: &str, query: Option<&str>) -> Response<Body> {
    match fallback(&state.router, path, query, state.list_prefixes) {
        RootOutcome::Redirect(location) => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
            if let Ok(value) = HeaderValue::from_str(&location) {
                response.headers_mut().insert(header::LOCATION, value);
            }
            response
        }
        RootOutcome::Listing(body) => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
        RootOutcome::NotFound => {
            let page = default_error_page(StatusCode::NOT_FOUND);
            let mut response = Response::new(match page.payload {
                Payload::Bytes(bytes) => Body::from(bytes),
                _ => Body::empty(),
            });
            *response.status_mut() = StatusCode::NOT_FOUND;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
            response
        }
    }
}
