//! Resource resolution.
//!
//! A [`Resolver`] is the external collaborator that maps a request path
//! to a response [`Descriptor`]. The serving core only depends on this
//! trait; directory, archive, and redirect-map implementations live
//! outside the core. [`memory::MemoryResolver`] is the in-tree
//! implementation used by the demo binary and the tests.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → router (longest-prefix match selects the entry)
//!     → Resolver::resolve(prefix, remainder, ctx)
//!     → Descriptor { stream + length | redirect, media type, encoding }
//!     → pipeline (negotiation, streaming)
//! ```

pub mod memory;
pub mod registry;

use std::fmt;
use std::pin::Pin;

use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Error raised by a resolver. Mapped to HTTP 500 by the pipeline, with
/// the error's kind used to look up a typed error body.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// I/O failure while locating or opening the resource.
    #[error("resolver I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The resolver's backing store is not configured.
    #[error("resolver not configured: {0}")]
    NotConfigured(String),

    /// Any other resolver-internal failure.
    #[error("resolver error: {0}")]
    Internal(String),
}

impl ResolveError {
    /// Stable name for this error variant, used to select a typed error
    /// body before falling back to the generic 500 page.
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Io(_) => "io",
            ResolveError::NotConfigured(_) => "not-configured",
            ResolveError::Internal(_) => "internal",
        }
    }
}

/// Declared response length.
///
/// Mirrors the `-1 / 0 / >0` wire convention: no body at all, unknown
/// length (chunked), or an exact byte count the pipeline will verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body is sent (e.g. an empty 404).
    Empty,
    /// Length unknown; the body is streamed chunked.
    Unknown,
    /// Exactly this many bytes; a mismatch aborts the response.
    Exact(u64),
}

/// A readable body source.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// The payload side of a descriptor: either a byte stream with a
/// declared length, or a redirect location. Exactly one is meaningful.
pub enum Payload {
    /// In-memory bytes; the declared length is the buffer length.
    Bytes(Vec<u8>),
    /// A streamed body with a declared length.
    Stream { reader: BodyReader, length: BodyLength },
    /// A redirect to another location (HTTP 302).
    Redirect(String),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Payload::Stream { length, .. } => {
                f.debug_struct("Stream").field("length", length).finish()
            }
            Payload::Redirect(loc) => f.debug_tuple("Redirect").field(loc).finish(),
        }
    }
}

/// Response descriptor produced by a resolver.
#[derive(Debug)]
pub struct Descriptor {
    /// Body bytes or redirect location.
    pub payload: Payload,
    /// Declared media type, e.g. `text/plain`; `None` skips negotiation.
    pub media_type: Option<String>,
    /// Content encoding (e.g. `gzip`) when the payload is pre-encoded.
    pub encoding: Option<String>,
}

impl Descriptor {
    /// Descriptor over in-memory bytes with a media type.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            payload: Payload::Bytes(bytes.into()),
            media_type: Some(media_type.into()),
            encoding: None,
        }
    }

    /// Descriptor over a streamed reader with a declared length.
    pub fn from_reader(
        reader: BodyReader,
        length: BodyLength,
        media_type: impl Into<String>,
    ) -> Self {
        Self {
            payload: Payload::Stream { reader, length },
            media_type: Some(media_type.into()),
            encoding: None,
        }
    }

    /// Redirect descriptor; the pipeline answers 302 with a `Location`.
    pub fn redirect(location: impl Into<String>) -> Self {
        Self {
            payload: Payload::Redirect(location.into()),
            media_type: None,
            encoding: None,
        }
    }

    /// Set the content encoding.
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// The declared length of this descriptor's body.
    pub fn declared_length(&self) -> BodyLength {
        match &self.payload {
            Payload::Bytes(b) => BodyLength::Exact(b.len() as u64),
            Payload::Stream { length, .. } => *length,
            Payload::Redirect(_) => BodyLength::Empty,
        }
    }

    /// True when this descriptor signals a redirect.
    pub fn is_redirect(&self) -> bool {
        matches!(self.payload, Payload::Redirect(_))
    }
}

/// Per-request state handed to resolvers.
///
/// Created once per inbound request and discarded after the response is
/// written or the connection is closed on error.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The request method.
    pub method: Method,
    /// Full request path.
    pub path: String,
    /// Raw query string, if any.
    pub query: Option<String>,
    /// Request headers.
    pub headers: HeaderMap,
    /// Buffered request body; `Some` for POST and PUT, `None` otherwise.
    pub body: Option<Bytes>,
    /// Correlation ID assigned by the request-id layer.
    pub request_id: String,
}

/// Maps a request path to a response descriptor.
///
/// Implementations must be cheap to call concurrently; the server invokes
/// `resolve` from many worker tasks at once.
pub trait Resolver: Send + Sync {
    /// Resolve the path remainder (the part after the matched prefix)
    /// to a descriptor. `Ok(None)` means not found (HTTP 404).
    fn resolve(
        &self,
        prefix: &str,
        remainder: &str,
        ctx: &RequestContext,
    ) -> Result<Option<Descriptor>, ResolveError>;

    /// Methods this resolver serves. Anything else is answered 405.
    fn accepts_method(&self, method: &Method) -> bool {
        *method == Method::GET || *method == Method::HEAD
    }

    /// Whether requests carrying a query string are resolvable at all.
    fn allows_query(&self) -> bool {
        false
    }

    /// True when a welcome page can be served for the bare prefix.
    fn welcome_available(&self) -> bool {
        false
    }

    /// The welcome descriptor, consulted only when the request path is
    /// empty or equals the prefix and there is no query.
    fn welcome(&self) -> Result<Option<Descriptor>, ResolveError> {
        Ok(None)
    }

    /// An error body for the given status; `None` falls back to the
    /// built-in error page.
    fn error_body(&self, _status: StatusCode) -> Option<Descriptor> {
        None
    }

    /// An error body typed to a [`ResolveError::kind`]; consulted before
    /// `error_body(500)` when resolution itself failed.
    fn typed_error_body(&self, _kind: &str) -> Option<Descriptor> {
        None
    }

    /// Prepare backing resources. Called when the server starts.
    fn configure(&self) -> Result<(), ResolveError> {
        Ok(())
    }

    /// Release backing resources. Called on remove, stop, and shutdown.
    fn deconfigure(&self) {}
}

/// Built-in minimal HTML error page, used when a resolver declines to
/// provide one.
pub fn default_error_page(status: StatusCode) -> Descriptor {
    let reason = status.canonical_reason().unwrap_or("Error");
    let body = format!(
        "<html><head><title>{code} {reason}</title></head>\
         <body><h1>{code} {reason}</h1></body></html>\n",
        code = status.as_u16(),
        reason = reason,
    );
    Descriptor::from_bytes(body.into_bytes(), "text/html; charset=utf-8")
}
