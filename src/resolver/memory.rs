//! In-memory resolver.
//!
//! Serves fixed byte bodies keyed by path remainder. Used by the demo
//! binary and by tests; production deployments register their own
//! [`Resolver`](super::Resolver) implementations through the
//! [`registry`](super::registry).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::{Method, StatusCode};

use super::{Descriptor, RequestContext, ResolveError, Resolver};

/// A stored entry: body bytes plus declared media type, optionally
/// marked as pre-encoded.
#[derive(Debug, Clone)]
struct Entry {
    body: Vec<u8>,
    media_type: String,
    encoding: Option<String>,
}

/// Resolver over a fixed map of path remainders.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    entries: BTreeMap<String, Entry>,
    welcome: Option<String>,
    error_bodies: HashMap<u16, Entry>,
    methods: HashSet<Method>,
    allow_query: bool,
    configured: AtomicBool,
}

impl MemoryResolver {
    pub fn new() -> Self {
        let mut methods = HashSet::new();
        methods.insert(Method::GET);
        methods.insert(Method::HEAD);
        Self {
            methods,
            ..Self::default()
        }
    }

    /// Add a body under a path remainder (no leading slash).
    pub fn with_entry(
        mut self,
        remainder: impl Into<String>,
        body: impl Into<Vec<u8>>,
        media_type: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            remainder.into(),
            Entry {
                body: body.into(),
                media_type: media_type.into(),
                encoding: None,
            },
        );
        self
    }

    /// Add a pre-encoded body (e.g. gzip) under a path remainder. The
    /// encoding is declared via `Content-Encoding` on the response.
    pub fn with_encoded_entry(
        mut self,
        remainder: impl Into<String>,
        body: impl Into<Vec<u8>>,
        media_type: impl Into<String>,
        encoding: impl Into<String>,
    ) -> Self {
        self.entries.insert(
            remainder.into(),
            Entry {
                body: body.into(),
                media_type: media_type.into(),
                encoding: Some(encoding.into()),
            },
        );
        self
    }

    /// Designate an existing entry as the welcome page for the prefix.
    pub fn with_welcome(mut self, remainder: impl Into<String>) -> Self {
        self.welcome = Some(remainder.into());
        self
    }

    /// Provide a custom error body for a status code.
    pub fn with_error_body(
        mut self,
        status: StatusCode,
        body: impl Into<Vec<u8>>,
        media_type: impl Into<String>,
    ) -> Self {
        self.error_bodies.insert(
            status.as_u16(),
            Entry {
                body: body.into(),
                media_type: media_type.into(),
                encoding: None,
            },
        );
        self
    }

    /// Additionally accept the given method (e.g. POST).
    pub fn with_method(mut self, method: Method) -> Self {
        self.methods.insert(method);
        self
    }

    /// Allow requests that carry a query string.
    pub fn with_query_allowed(mut self) -> Self {
        self.allow_query = true;
        self
    }

    fn descriptor(entry: &Entry) -> Descriptor {
        let descriptor = Descriptor::from_bytes(entry.body.clone(), entry.media_type.clone());
        match &entry.encoding {
            Some(encoding) => descriptor.with_encoding(encoding),
            None => descriptor,
        }
    }
}

impl Resolver for MemoryResolver {
    fn resolve(
        &self,
        _prefix: &str,
        remainder: &str,
        _ctx: &RequestContext,
    ) -> Result<Option<Descriptor>, ResolveError> {
        if !self.configured.load(Ordering::Acquire) {
            return Err(ResolveError::NotConfigured("memory resolver".into()));
        }
        Ok(self.entries.get(remainder).map(Self::descriptor))
    }

    fn accepts_method(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }

    fn allows_query(&self) -> bool {
        self.allow_query
    }

    fn welcome_available(&self) -> bool {
        self.welcome.is_some()
    }

    fn welcome(&self) -> Result<Option<Descriptor>, ResolveError> {
        Ok(self
            .welcome
            .as_ref()
            .and_then(|key| self.entries.get(key))
            .map(Self::descriptor))
    }

    fn error_body(&self, status: StatusCode) -> Option<Descriptor> {
        self.error_bodies
            .get(&status.as_u16())
            .map(Self::descriptor)
    }

    fn configure(&self) -> Result<(), ResolveError> {
        self.configured.store(true, Ordering::Release);
        Ok(())
    }

    fn deconfigure(&self) {
        self.configured.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            method: Method::GET,
            path: "/docs/file".into(),
            query: None,
            headers: Default::default(),
            body: None,
            request_id: "test".into(),
        }
    }

    #[test]
    fn resolves_registered_entries() {
        let r = MemoryResolver::new().with_entry("file", b"hello world".to_vec(), "text/plain");
        r.configure().unwrap();
        let d = r.resolve("/docs/", "file", &ctx()).unwrap().unwrap();
        assert_eq!(d.media_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn unknown_remainder_is_not_found() {
        let r = MemoryResolver::new();
        r.configure().unwrap();
        assert!(r.resolve("/docs/", "missing", &ctx()).unwrap().is_none());
    }

    #[test]
    fn unconfigured_resolver_errors() {
        let r = MemoryResolver::new().with_entry("file", b"x".to_vec(), "text/plain");
        assert!(r.resolve("/docs/", "file", &ctx()).is_err());
        r.configure().unwrap();
        r.deconfigure();
        assert!(r.resolve("/docs/", "file", &ctx()).is_err());
    }

    #[test]
    fn encoded_entry_declares_its_encoding() {
        let r = MemoryResolver::new().with_encoded_entry("f.gz", b"x".to_vec(), "text/plain", "gzip");
        r.configure().unwrap();
        let d = r.resolve("/docs/", "f.gz", &ctx()).unwrap().unwrap();
        assert_eq!(d.encoding.as_deref(), Some("gzip"));
    }

    #[test]
    fn welcome_entry_round_trips() {
        let r = MemoryResolver::new()
            .with_entry("index.html", b"<html/>".to_vec(), "text/html")
            .with_welcome("index.html");
        assert!(r.welcome_available());
        assert!(r.welcome().unwrap().is_some());
    }
}
