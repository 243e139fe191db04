//! Per-prefix request authentication.
//!
//! An [`Authenticator`] can be attached to a prefix when it is added;
//! the pipeline consults it after method gating and before resolution.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Why a request was denied.
#[derive(Debug, Clone)]
pub struct Denial {
    /// The `WWW-Authenticate` challenge to send with the 401.
    pub challenge: String,
}

/// Credential check for requests under one prefix.
pub trait Authenticator: Send + Sync {
    /// Check the request's credentials. `Err` yields a 401 carrying the
    /// denial's challenge.
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), Denial>;
}

/// HTTP Basic authentication against a fixed username/password table.
pub struct BasicAuthenticator {
    realm: String,
    credentials: HashMap<String, String>,
}

impl BasicAuthenticator {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            credentials: HashMap::new(),
        }
    }

    /// Add a username/password pair.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.insert(user.into(), password.into());
        self
    }

    fn denial(&self) -> Denial {
        Denial {
            challenge: format!("Basic realm=\"{}\"", self.realm),
        }
    }

    fn check(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(pair) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, password)) = pair.split_once(':') else {
            return false;
        };
        self.credentials.get(user).map(String::as_str) == Some(password)
    }
}

impl Authenticator for BasicAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), Denial> {
        let authorized = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| self.check(v))
            .unwrap_or(false);
        if authorized {
            Ok(())
        } else {
            Err(self.denial())
        }
    }
}

const STAMP_LEN: usize = 4;
const DIGEST_LEN: usize = 32;

/// Basic authentication over time-limited digest tokens.
///
/// On the wire this is ordinary Basic auth (RFC 7617); the difference is
/// in the password field, which carries a URL-safe base64 token: a
/// 4-byte little-endian creation time (seconds since the Unix epoch)
/// followed by the SHA-256 digest of that stamp and the shared password.
/// Tokens whose stamp falls outside the skew window are rejected even
/// when the digest matches, so a captured token is only replayable
/// briefly. The advertised realm carries a `[D]` prefix so clients know
/// to send digest tokens rather than the password itself.
pub struct TimedDigestAuthenticator {
    realm: String,
    credentials: HashMap<String, String>,
    /// Tolerated client-clock lead, in seconds.
    max_ahead_secs: i64,
    /// Token lifetime: how far in the past the stamp may lie.
    max_behind_secs: i64,
}

impl TimedDigestAuthenticator {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            credentials: HashMap::new(),
            max_ahead_secs: 10,
            max_behind_secs: 150,
        }
    }

    /// Add a username and its shared password.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials.insert(user.into(), password.into());
        self
    }

    /// Adjust the accepted skew window.
    pub fn with_skew_window(mut self, max_ahead_secs: i64, max_behind_secs: i64) -> Self {
        self.max_ahead_secs = max_ahead_secs;
        self.max_behind_secs = max_behind_secs;
        self
    }

    /// Client-side token for a shared password, stamped at `at`.
    pub fn token_at(password: &str, at: SystemTime) -> String {
        let stamp = at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let mut bytes = stamp.to_le_bytes().to_vec();
        let mut hasher = Sha256::new();
        hasher.update(stamp.to_le_bytes());
        hasher.update(password.as_bytes());
        bytes.extend_from_slice(&hasher.finalize());
        BASE64_URL.encode(bytes)
    }

    fn denial(&self) -> Denial {
        Denial {
            challenge: format!("Basic realm=\"[D]{}\"", self.realm),
        }
    }

    fn check(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64.decode(encoded.trim()) else {
            return false;
        };
        let Ok(pair) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((user, token)) = pair.split_once(':') else {
            return false;
        };
        let Some(password) = self.credentials.get(user) else {
            return false;
        };
        let Ok(raw) = BASE64_URL.decode(token) else {
            return false;
        };
        if raw.len() != STAMP_LEN + DIGEST_LEN {
            return false;
        }
        let stamp = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let age = now - stamp;
        if age < -self.max_ahead_secs || age > self.max_behind_secs {
            return false;
        }
        let mut hasher = Sha256::new();
        hasher.update(&raw[..STAMP_LEN]);
        hasher.update(password.as_bytes());
        hasher.finalize().as_slice() == &raw[STAMP_LEN..]
    }
}

impl Authenticator for TimedDigestAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> Result<(), Denial> {
        let authorized = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| self.check(v))
            .unwrap_or(false);
        if authorized {
            Ok(())
        } else {
            Err(self.denial())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::AUTHORIZATION;
    use std::time::Duration;

    fn auth() -> BasicAuthenticator {
        BasicAuthenticator::new("test").with_user("alice", "secret")
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn valid_credentials_pass() {
        let encoded = BASE64.encode("alice:secret");
        let headers = headers_with(&format!("Basic {encoded}"));
        assert!(auth().authenticate(&headers).is_ok());
    }

    #[test]
    fn wrong_password_is_denied_with_challenge() {
        let encoded = BASE64.encode("alice:wrong");
        let headers = headers_with(&format!("Basic {encoded}"));
        let denial = auth().authenticate(&headers).unwrap_err();
        assert_eq!(denial.challenge, "Basic realm=\"test\"");
    }

    #[test]
    fn missing_header_is_denied() {
        assert!(auth().authenticate(&HeaderMap::new()).is_err());
    }

    #[test]
    fn non_basic_scheme_is_denied() {
        let headers = headers_with("Bearer token");
        assert!(auth().authenticate(&headers).is_err());
    }

    fn timed_auth() -> TimedDigestAuthenticator {
        TimedDigestAuthenticator::new("vault").with_user("alice", "secret")
    }

    fn timed_headers(user: &str, token: &str) -> HeaderMap {
        let encoded = BASE64.encode(format!("{user}:{token}"));
        headers_with(&format!("Basic {encoded}"))
    }

    #[test]
    fn fresh_token_passes() {
        let token = TimedDigestAuthenticator::token_at("secret", SystemTime::now());
        assert!(timed_auth()
            .authenticate(&timed_headers("alice", &token))
            .is_ok());
    }

    #[test]
    fn expired_token_is_denied() {
        let stale = SystemTime::now() - Duration::from_secs(300);
        let token = TimedDigestAuthenticator::token_at("secret", stale);
        assert!(timed_auth()
            .authenticate(&timed_headers("alice", &token))
            .is_err());
    }

    #[test]
    fn future_token_beyond_skew_is_denied() {
        let ahead = SystemTime::now() + Duration::from_secs(60);
        let token = TimedDigestAuthenticator::token_at("secret", ahead);
        assert!(timed_auth()
            .authenticate(&timed_headers("alice", &token))
            .is_err());
    }

    #[test]
    fn wrong_shared_password_is_denied() {
        let token = TimedDigestAuthenticator::token_at("guessed", SystemTime::now());
        assert!(timed_auth()
            .authenticate(&timed_headers("alice", &token))
            .is_err());
    }

    #[test]
    fn challenge_realm_marks_digest_tokens() {
        let denial = timed_auth().authenticate(&HeaderMap::new()).unwrap_err();
        assert_eq!(denial.challenge, "Basic realm=\"[D]vault\"");
    }
}
