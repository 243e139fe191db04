//! Prefix table with longest-prefix lookup.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{info, warn};

use crate::http::auth::Authenticator;
use crate::resolver::Resolver;

/// Errors from prefix-table mutation.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The normalized prefix is already registered.
    #[error("prefix already registered: {0}")]
    DuplicatePrefix(String),

    /// The table has been cleared by a terminal shutdown.
    #[error("router has shut down")]
    ShutDown,
}

/// A registered entry: the resolver serving one normalized prefix,
/// plus its optional authenticator.
#[derive(Clone)]
pub struct RouteEntry {
    pub prefix: String,
    pub resolver: Arc<dyn Resolver>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

/// Result of a successful lookup: the matched entry plus the path
/// remainder (the part after the prefix, no leading slash).
pub struct RouteMatch {
    pub entry: RouteEntry,
    pub remainder: String,
}

#[derive(Clone)]
struct Registered {
    resolver: Arc<dyn Resolver>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

struct Inner {
    entries: BTreeMap<String, Registered>,
    // additions made while stopping, activated on the next start
    pending: BTreeMap<String, Registered>,
}

/// Shared prefix table.
///
/// All methods take `&self`; interior locking keeps mutation safe from
/// both the serving path and the lifecycle control path.
pub struct PrefixRouter {
    inner: RwLock<Inner>,
    stopping: AtomicBool,
    shut_down: AtomicBool,
}

impl PrefixRouter {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: BTreeMap::new(),
                pending: BTreeMap::new(),
            }),
            stopping: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Normalize a prefix to `/…/` form. `None` and `""` mean the root.
    pub fn normalize(prefix: Option<&str>) -> String {
        let trimmed = prefix.unwrap_or("").trim_matches('/');
        if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}/")
        }
    }

    /// Register a resolver under a prefix.
    ///
    /// While the server is stopping the entry is queued instead and
    /// becomes active on the next start. Registering a prefix nested
    /// under (or above) an existing one succeeds with a warning, since
    /// longest-prefix lookup keeps both reachable.
    pub fn add(
        &self,
        prefix: Option<&str>,
        resolver: Arc<dyn Resolver>,
    ) -> Result<String, RouterError> {
        self.add_with_auth(prefix, resolver, None)
    }

    /// Register a resolver guarded by an authenticator.
    pub fn add_with_auth(
        &self,
        prefix: Option<&str>,
        resolver: Arc<dyn Resolver>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Result<String, RouterError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(RouterError::ShutDown);
        }
        let prefix = Self::normalize(prefix);
        let mut inner = self.write();
        if inner.entries.contains_key(&prefix) || inner.pending.contains_key(&prefix) {
            return Err(RouterError::DuplicatePrefix(prefix));
        }
        for existing in inner.entries.keys().chain(inner.pending.keys()) {
            if prefix != "/" && existing != "/" && is_nested(existing, &prefix) {
                warn!(new = %prefix, existing = %existing, "prefix shadows an existing entry");
            }
        }
        let registered = Registered {
            resolver,
            authenticator,
        };
        if self.stopping.load(Ordering::Acquire) {
            info!(prefix = %prefix, "server stopping, queueing prefix for next start");
            inner.pending.insert(prefix.clone(), registered);
        } else {
            inner.entries.insert(prefix.clone(), registered);
        }
        Ok(prefix)
    }

    /// Remove a prefix, deconfiguring its resolver. Returns whether an
    /// entry was removed.
    pub fn remove(&self, prefix: Option<&str>) -> bool {
        let prefix = Self::normalize(prefix);
        let mut inner = self.write();
        let removed = inner
            .entries
            .remove(&prefix)
            .or_else(|| inner.pending.remove(&prefix));
        match removed {
            Some(registered) => {
                drop(inner);
                registered.resolver.deconfigure();
                true
            }
            None => false,
        }
    }

    /// Longest-prefix lookup.
    ///
    /// Walks the path from its full length toward the root, stripping one
    /// segment per step, so the cost is bounded by path depth rather than
    /// table size.
    /// A bare prefix without its trailing slash does not match; the root
    /// fallback answers those with a redirect.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        let inner = self.read();
        let mut candidate = match path.rfind('/') {
            Some(pos) => path[..=pos].to_string(),
            None => return None,
        };
        loop {
            if let Some(registered) = inner.entries.get(&candidate) {
                let remainder = path[candidate.len()..].to_string();
                return Some(RouteMatch {
                    entry: RouteEntry {
                        prefix: candidate,
                        resolver: Arc::clone(&registered.resolver),
                        authenticator: registered.authenticator.clone(),
                    },
                    remainder,
                });
            }
            if candidate == "/" {
                return None;
            }
            // strip the last segment, keeping the trailing slash
            let without_slash = &candidate[..candidate.len() - 1];
            match without_slash.rfind('/') {
                Some(pos) => candidate.truncate(pos + 1),
                None => return None,
            }
        }
    }

    /// Exact-prefix membership test, used by the root fallback to offer
    /// a trailing-slash redirect.
    pub fn contains(&self, prefix: &str) -> bool {
        self.read().entries.contains_key(prefix)
    }

    /// Snapshot of active prefixes, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        self.read().entries.keys().cloned().collect()
    }

    /// Snapshot of active entries.
    pub fn entries(&self) -> Vec<RouteEntry> {
        self.read()
            .entries
            .iter()
            .map(|(prefix, registered)| RouteEntry {
                prefix: prefix.clone(),
                resolver: Arc::clone(&registered.resolver),
                authenticator: registered.authenticator.clone(),
            })
            .collect()
    }

    /// Mark the table as stopping; subsequent adds are queued.
    pub fn set_stopping(&self, stopping: bool) {
        self.stopping.store(stopping, Ordering::Release);
    }

    /// Promote entries queued while stopping into the active table.
    pub fn activate_pending(&self) {
        let mut inner = self.write();
        let pending = std::mem::take(&mut inner.pending);
        for (prefix, registered) in pending {
            info!(prefix = %prefix, "activating queued prefix");
            inner.entries.insert(prefix, registered);
        }
    }

    /// Terminal clear: deconfigure everything and refuse further adds.
    pub fn clear(&self) {
        self.shut_down.store(true, Ordering::Release);
        let mut inner = self.write();
        let entries = std::mem::take(&mut inner.entries);
        inner.pending.clear();
        drop(inner);
        for registered in entries.into_values() {
            registered.resolver.deconfigure();
        }
    }

    /// Run `configure` on every active resolver; the first failure wins.
    pub fn configure_all(&self) -> Result<(), crate::resolver::ResolveError> {
        for entry in self.entries() {
            entry.resolver.configure()?;
        }
        Ok(())
    }

    /// Run `deconfigure` on every active resolver.
    pub fn deconfigure_all(&self) {
        for entry in self.entries() {
            entry.resolver.deconfigure();
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PrefixRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// True when one normalized prefix sits under the other.
fn is_nested(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}
