//! Resolver factory registry.
//!
//! Maps string keys to constructor functions resolved at startup, so a
//! configuration file can name resolver kinds without any runtime class
//! loading. The `memory` kind is registered out of the box.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::memory::MemoryResolver;
use super::Resolver;

/// Errors from registry registration and construction.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A factory with this key is already registered.
    #[error("resolver kind already registered: {0}")]
    DuplicateKind(String),

    /// No factory is registered under this key.
    #[error("unknown resolver kind: {0}")]
    UnknownKind(String),

    /// The factory rejected its arguments.
    #[error("invalid resolver arguments for {kind}: {message}")]
    InvalidArgs { kind: String, message: String },
}

/// Constructor function for a resolver kind.
pub type ResolverFactory =
    Box<dyn Fn(Option<&toml::Value>) -> Result<Arc<dyn Resolver>, RegistryError> + Send + Sync>;

/// Registry of resolver constructors keyed by kind name.
pub struct ResolverRegistry {
    factories: HashMap<String, ResolverFactory>,
}

impl ResolverRegistry {
    /// Empty registry with the built-in `memory` kind pre-registered.
    pub fn new() -> Self {
        let mut factories: HashMap<String, ResolverFactory> = HashMap::new();
        factories.insert("memory".to_string(), Box::new(memory_factory));
        Self { factories }
    }

    /// Register a factory under a kind name.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        factory: ResolverFactory,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Construct a resolver of the named kind.
    pub fn create(
        &self,
        kind: &str,
        args: Option<&toml::Value>,
    ) -> Result<Arc<dyn Resolver>, RegistryError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))?;
        factory(args)
    }

    /// Registered kind names.
    pub fn kinds(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory for the built-in in-memory resolver.
///
/// Arguments (TOML):
/// ```toml
/// welcome = "index.html"
/// [entries."index.html"]
/// body = "<html>...</html>"
/// media_type = "text/html"
/// ```
///
/// An entry may declare `encoding = "gzip"` when its body is
/// pre-encoded.
fn memory_factory(args: Option<&toml::Value>) -> Result<Arc<dyn Resolver>, RegistryError> {
    let mut resolver = MemoryResolver::new();
    let Some(args) = args else {
        return Ok(Arc::new(resolver));
    };
    let invalid = |message: &str| RegistryError::InvalidArgs {
        kind: "memory".into(),
        message: message.into(),
    };
    let table = args.as_table().ok_or_else(|| invalid("expected a table"))?;
    if let Some(entries) = table.get("entries") {
        let entries = entries
            .as_table()
            .ok_or_else(|| invalid("entries must be a table"))?;
        for (path, entry) in entries {
            let entry = entry
                .as_table()
                .ok_or_else(|| invalid("entry must be a table"))?;
            let body = entry
                .get("body")
                .and_then(|v| v.as_str())
                .ok_or_else(|| invalid("entry.body must be a string"))?;
            let media_type = entry
                .get("media_type")
                .and_then(|v| v.as_str())
                .unwrap_or("text/plain");
            resolver = match entry.get("encoding").and_then(|v| v.as_str()) {
                Some(encoding) => resolver.with_encoded_entry(
                    path.clone(),
                    body.as_bytes().to_vec(),
                    media_type,
                    encoding,
                ),
                None => resolver.with_entry(path.clone(), body.as_bytes().to_vec(), media_type),
            };
        }
    }
    if let Some(welcome) = table.get("welcome") {
        let welcome = welcome
            .as_str()
            .ok_or_else(|| invalid("welcome must be a string"))?;
        resolver = resolver.with_welcome(welcome);
    }
    if table
        .get("allow_query")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        resolver = resolver.with_query_allowed();
    }
    Ok(Arc::new(resolver))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_kind_is_built_in() {
        let registry = ResolverRegistry::new();
        assert!(registry.create("memory", None).is_ok());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = ResolverRegistry::new();
        assert!(matches!(
            registry.create("zip", None),
            Err(RegistryError::UnknownKind(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = ResolverRegistry::new();
        let result = registry.register("memory", Box::new(|_| unreachable!()));
        assert!(matches!(result, Err(RegistryError::DuplicateKind(_))));
    }

    #[test]
    fn memory_factory_reads_entries() {
        let registry = ResolverRegistry::new();
        let args: toml::Value = toml::from_str(
            r#"
            welcome = "index.html"
            [entries."index.html"]
            body = "<html></html>"
            media_type = "text/html"
            "#,
        )
        .unwrap();
        let resolver = registry.create("memory", Some(&args)).unwrap();
        assert!(resolver.welcome_available());
    }
}
