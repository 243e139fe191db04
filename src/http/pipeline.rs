//! Per-request pipeline.
//!
//! # Responsibilities
//! - Gate the request method against what the resolver accepts
//! - Drain unread request bodies before answering errors
//! - Run content negotiation against the `Accept` header
//! - Stream response bodies, verifying declared lengths
//!
//! # Design Decisions
//! - The pipeline is a state machine (`Stage`); transitions show up in
//!   trace logs so a stuck request can be located
//! - Error bodies are only sent when the client's `Accept` header admits
//!   their media type; otherwise the status goes out bare
//! - A declared-length mismatch aborts the response stream mid-flight
//!   rather than silently truncating or padding

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Method, Request, Response, StatusCode};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, trace, warn};

use crate::http::accept::Acceptor;
use crate::resolver::{
    default_error_page, BodyLength, BodyReader, Descriptor, Payload, RequestContext, Resolver,
};
use crate::routing::prefix::RouteMatch;

const STREAM_CHUNK: usize = 8 * 1024;
const REQUEST_BODY_LIMIT: usize = 1024 * 1024;

/// Pipeline stages, surfaced in trace logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    MethodChecked,
    BodyDrained,
    Resolved,
    Negotiated,
    Streaming,
    Closed,
}

/// The per-request state machine.
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// `Cache-Control: max-age` applied to successful GET responses.
    cache_max_age_secs: u64,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            cache_max_age_secs: 3600,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a matched request through the pipeline and produce a response.
    pub async fn handle(&self, route: RouteMatch, request: Request<Body>) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let method = parts.method.clone();
        let path = parts.uri.path().to_string();
        let query = parts.uri.query().map(str::to_string);
        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let resolver = &route.entry.resolver;

        let mut stage = Stage::Received;
        trace!(request_id = %request_id, method = %method, path = %path, stage = ?stage, "request entered pipeline");

        // Parse the Accept header up front; error descriptors are gated
        // by it just like regular bodies.
        let acceptor = match Acceptor::from_headers(&parts.headers) {
            Ok(acceptor) => acceptor,
            Err(err) => {
                debug!(request_id = %request_id, error = %err, "unparseable Accept header");
                drain(body).await;
                return close(status_response(StatusCode::NOT_ACCEPTABLE), &request_id);
            }
        };

        // Method gating. Unaccepted methods still get their body drained
        // so the connection stays reusable.
        if method != Method::OPTIONS && !resolver.accepts_method(&method) {
            drain(body).await;
            let allow = allow_header(resolver.as_ref());
            debug!(request_id = %request_id, method = %method, "method not accepted");
            return close(
                self.error_response(
                    resolver.as_ref(),
                    StatusCode::METHOD_NOT_ALLOWED,
                    &acceptor,
                    &method,
                )
                .with_header(header::ALLOW, &allow),
                &request_id,
            );
        }
        stage = Stage::MethodChecked;
        trace!(request_id = %request_id, stage = ?stage, "method accepted");

        // OPTIONS is answered here; the resolver never sees it.
        if method == Method::OPTIONS {
            drain(body).await;
            let allow = allow_header(resolver.as_ref());
            return close(
                status_response(StatusCode::OK).with_header(header::ALLOW, &allow),
                &request_id,
            );
        }

        // Expectations are not supported.
        if parts.headers.contains_key(header::EXPECT) {
            drain(body).await;
            return close(
                self.error_response(
                    resolver.as_ref(),
                    StatusCode::EXPECTATION_FAILED,
                    &acceptor,
                    &method,
                ),
                &request_id,
            );
        }

        // Buffer POST/PUT bodies for the resolver; everything else is
        // read and discarded.
        let request_body = if method == Method::POST || method == Method::PUT {
            match axum::body::to_bytes(body, REQUEST_BODY_LIMIT).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    debug!(request_id = %request_id, error = %err, "request body unreadable");
                    return close(status_response(StatusCode::PAYLOAD_TOO_LARGE), &request_id);
                }
            }
        } else {
            drain(body).await;
            None
        };
        stage = Stage::BodyDrained;
        trace!(request_id = %request_id, stage = ?stage, "request body consumed");

        if let Some(auth) = &route.entry.authenticator {
            if let Err(denial) = auth.authenticate(&parts.headers) {
                debug!(request_id = %request_id, "authentication failed");
                return close(
                    status_response(StatusCode::UNAUTHORIZED)
                        .with_header(header::WWW_AUTHENTICATE, &denial.challenge),
                    &request_id,
                );
            }
        }

        // A query the resolver cannot interpret means the resource does
        // not exist under that name.
        if query.is_some() && !resolver.allows_query() {
            return close(
                self.error_response(resolver.as_ref(), StatusCode::NOT_FOUND, &acceptor, &method),
                &request_id,
            );
        }

        let ctx = RequestContext {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            headers: parts.headers.clone(),
            body: request_body,
            request_id: request_id.clone(),
        };

        let resolved = if route.remainder.is_empty() && query.is_none() {
            // bare prefix: welcome page first, otherwise the resolver
            // gets to interpret the empty remainder itself
            match resolver.welcome() {
                Ok(Some(descriptor)) => Ok(Some(descriptor)),
                Ok(None) => resolver.resolve(&route.entry.prefix, "", &ctx),
                Err(err) => Err(err),
            }
        } else {
            resolver.resolve(&route.entry.prefix, &route.remainder, &ctx)
        };
        stage = Stage::Resolved;
        trace!(request_id = %request_id, stage = ?stage, "resolution finished");

        let descriptor = match resolved {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                // browsers ask for favicons constantly; answer those
                // with a bare 404 instead of an error page
                if route.remainder == "favicon.ico" {
                    return close(status_response(StatusCode::NOT_FOUND), &request_id);
                }
                return close(
                    self.error_response(
                        resolver.as_ref(),
                        StatusCode::NOT_FOUND,
                        &acceptor,
                        &method,
                    ),
                    &request_id,
                );
            }
            Err(err) => {
                warn!(request_id = %request_id, error = %err, kind = err.kind(), "resolver failed");
                let body = resolver
                    .typed_error_body(err.kind())
                    .or_else(|| resolver.error_body(StatusCode::INTERNAL_SERVER_ERROR));
                let response = match body {
                    Some(descriptor) => self.body_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        descriptor,
                        &acceptor,
                        &method,
                    ),
                    None => self.error_response(
                        resolver.as_ref(),
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &acceptor,
                        &method,
                    ),
                };
                return close(response, &request_id);
            }
        };

        // Content negotiation against the descriptor's declared type.
        // Redirects skip it; they carry no body.
        if let Payload::Redirect(location) = &descriptor.payload {
            return close(
                status_response(StatusCode::FOUND).with_header(header::LOCATION, location),
                &request_id,
            );
        }
        if let Some(media_type) = &descriptor.media_type {
            if !acceptor.is_acceptable(media_type) {
                debug!(request_id = %request_id, media_type = %media_type, "negotiation failed");
                return close(
                    self.error_response(
                        resolver.as_ref(),
                        StatusCode::NOT_ACCEPTABLE,
                        &acceptor,
                        &method,
                    ),
                    &request_id,
                );
            }
        }
        stage = Stage::Negotiated;
        trace!(request_id = %request_id, stage = ?stage, "negotiation succeeded");

        let mut response = status_response(StatusCode::OK)
            .with_header(header::ACCEPT_RANGES, "none");
        if let Some(media_type) = &descriptor.media_type {
            response = response.with_header(header::CONTENT_TYPE, media_type);
        }
        if let Some(encoding) = &descriptor.encoding {
            response = response.with_header(header::CONTENT_ENCODING, encoding);
        }
        if method == Method::GET {
            response = response.with_header(
                header::CACHE_CONTROL,
                &format!("max-age={}, public", self.cache_max_age_secs),
            );
        }

        if method == Method::HEAD {
            // headers only, but with the length the GET would have
            if let BodyLength::Exact(len) = descriptor.declared_length() {
                response = response.with_header(header::CONTENT_LENGTH, &len.to_string());
            }
            return close(response, &request_id);
        }

        stage = Stage::Streaming;
        trace!(request_id = %request_id, stage = ?stage, "streaming response body");
        let response = match descriptor.payload {
            Payload::Bytes(bytes) => response.with_body(Body::from(bytes)),
            Payload::Stream { reader, length } => {
                if let BodyLength::Exact(len) = length {
                    response = response.with_header(header::CONTENT_LENGTH, &len.to_string());
                }
                response.with_body(Body::from_stream(LengthChecked::new(reader, length)))
            }
            Payload::Redirect(_) => response,
        };
        close(response, &request_id)
    }

    /// Error response with a resolver-supplied or built-in body, gated by
    /// the client's `Accept` header.
    fn error_response(
        &self,
        resolver: &dyn Resolver,
        status: StatusCode,
        acceptor: &Acceptor,
        method: &Method,
    ) -> Response<Body> {
        let descriptor = resolver
            .error_body(status)
            .unwrap_or_else(|| default_error_page(status));
        self.body_response(status, descriptor, acceptor, method)
    }

    fn body_response(
        &self,
        status: StatusCode,
        descriptor: Descriptor,
        acceptor: &Acceptor,
        method: &Method,
    ) -> Response<Body> {
        let acceptable = descriptor
            .media_type
            .as_deref()
            .map(|mt| acceptor.is_acceptable(mt))
            .unwrap_or(true);
        if !acceptable || *method == Method::HEAD {
            return status_response(status);
        }
        let mut response = status_response(status);
        if let Some(media_type) = &descriptor.media_type {
            response = response.with_header(header::CONTENT_TYPE, media_type);
        }
        match descriptor.payload {
            Payload::Bytes(bytes) => response.with_body(Body::from(bytes)),
            Payload::Stream { reader, length } => {
                response.with_body(Body::from_stream(LengthChecked::new(reader, length)))
            }
            Payload::Redirect(_) => response,
        }
    }
}

/// `Allow` header for this resolver: OPTIONS and TRACE are always served
/// by the core, the rest comes from the resolver.
fn allow_header(resolver: &dyn Resolver) -> String {
    let mut allow = String::from("OPTIONS, TRACE");
    for method in [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::PATCH,
    ] {
        if resolver.accepts_method(&method) {
            allow.push_str(", ");
            allow.push_str(method.as_str());
        }
    }
    allow
}

/// Read and discard the request body.
async fn drain(body: Body) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

fn close(response: Response<Body>, request_id: &str) -> Response<Body> {
    trace!(request_id = %request_id, status = %response.status(), stage = ?Stage::Closed, "response ready");
    response
}

/// Builder-ish helpers over `Response<Body>` that cannot fail: invalid
/// header values are dropped rather than panicking the worker.
trait ResponseExt {
    fn with_header(self, name: header::HeaderName, value: &str) -> Self;
    fn with_body(self, body: Body) -> Self;
}

impl ResponseExt for Response<Body> {
    fn with_header(mut self, name: header::HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers_mut().insert(name, value);
        }
        self
    }

    fn with_body(mut self, body: Body) -> Self {
        *self.body_mut() = body;
        self
    }
}

fn status_response(status: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

/// Body stream that enforces the declared length.
///
/// Yields an error (aborting the HTTP response mid-stream) when the
/// source ends early or keeps producing past the declared count.
struct LengthChecked {
    reader: BodyReader,
    expected: Option<u64>,
    sent: u64,
    done: bool,
}

impl LengthChecked {
    fn new(reader: BodyReader, length: BodyLength) -> Self {
        let expected = match length {
            BodyLength::Exact(n) => Some(n),
            BodyLength::Unknown => None,
            BodyLength::Empty => Some(0),
        };
        Self {
            reader,
            expected,
            sent: 0,
            done: false,
        }
    }
}

impl Stream for LengthChecked {
    type Item = Result<Bytes, io::Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        let mut buf = [0u8; STREAM_CHUNK];
        let mut read_buf = ReadBuf::new(&mut buf);
        match this.reader.as_mut().poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(err)) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Ok(())) => {
                let filled = read_buf.filled();
                if filled.is_empty() {
                    this.done = true;
                    if let Some(expected) = this.expected {
                        if this.sent != expected {
                            return Poll::Ready(Some(Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!(
                                    "body ended at {} of {} declared bytes",
                                    this.sent, expected
                                ),
                            ))));
                        }
                    }
                    return Poll::Ready(None);
                }
                this.sent += filled.len() as u64;
                if let Some(expected) = this.expected {
                    if this.sent > expected {
                        this.done = true;
                        return Poll::Ready(Some(Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("body exceeded {expected} declared bytes"),
                        ))));
                    }
                }
                Poll::Ready(Some(Ok(Bytes::copy_from_slice(filled))))
            }
        }
    }
}
