//! `Accept` header parsing and media-type negotiation.
//!
//! # Responsibilities
//! - Parse an `Accept` header into ranked media-type patterns
//! - Respect quoted parameter values when splitting (a quoted value may
//!   itself contain commas or semicolons)
//! - Match a candidate media type against the ranked patterns
//!
//! # Design Decisions
//! - Total order: higher `q` first, fewer wildcards first, more explicit
//!   parameters first, original arrival order as the stable tie-break
//! - A missing `Accept` header accepts anything (`*/*`)
//! - A pattern's parameters must all be present with equal values in the
//!   candidate; the candidate may carry extra parameters

use std::cmp::Ordering;
use std::collections::BTreeMap;

use thiserror::Error;

/// Errors produced while parsing an `Accept` header or candidate type.
#[derive(Debug, Error)]
pub enum AcceptError {
    /// A media range had no `type/subtype` part at all.
    #[error("empty media range")]
    EmptyRange,

    /// The `type/subtype` part was malformed (e.g. `*/html`).
    #[error("malformed media type pattern: {0}")]
    BadPattern(String),

    /// The `q` parameter did not parse as a number.
    #[error("bad quality value: {0}")]
    BadQuality(String),
}

/// A single ranked pattern from an `Accept` header.
///
/// Carries the wildcard-precedence rank (0 = fully explicit, 2 = `*/*`)
/// and the arrival index used as the stable tie-break.
#[derive(Debug, Clone)]
pub struct MediaRange {
    kind: String,
    subtype: String,
    params: BTreeMap<String, String>,
    q: f64,
    wildcards: u8,
    index: usize,
}

impl MediaRange {
    /// Parse a single media range such as `text/html;q=0.9;level=1`.
    ///
    /// The `q` parameter (default 1.0) is extracted and removed from the
    /// parameter map. `charset` values are compared case-insensitively.
    fn parse(item: &str, index: usize) -> Result<Self, AcceptError> {
        let elements = split_quoted(item, ';');
        let mut parts = elements.iter();
        let pattern = parts.next().ok_or(AcceptError::EmptyRange)?.trim();
        if pattern.is_empty() {
            return Err(AcceptError::EmptyRange);
        }

        let (kind, subtype) = if pattern == "*" {
            ("*".to_string(), "*".to_string())
        } else {
            let (k, s) = pattern
                .split_once('/')
                .ok_or_else(|| AcceptError::BadPattern(pattern.to_string()))?;
            let k = k.trim().to_ascii_lowercase();
            let s = s.trim().to_ascii_lowercase();
            if k.is_empty() || s.is_empty() {
                return Err(AcceptError::BadPattern(pattern.to_string()));
            }
            // `*/subtype` is not a legal pattern
            if k == "*" && s != "*" {
                return Err(AcceptError::BadPattern(pattern.to_string()));
            }
            (k, s)
        };

        let mut wildcards = 0u8;
        if subtype == "*" {
            wildcards += 1;
        }
        if kind == "*" {
            wildcards += 1;
        }

        let mut params = BTreeMap::new();
        let mut q = 1.0f64;
        for element in parts {
            let element = element.trim();
            if element.is_empty() {
                continue;
            }
            match element.split_once('=') {
                None => {
                    // a bare token acts as its own value
                    let key = element.to_ascii_lowercase();
                    params.insert(key.clone(), key);
                }
                Some((key, value)) => {
                    let key = key.trim().to_ascii_lowercase();
                    let mut value = unquote(value.trim()).to_string();
                    if key == "charset" {
                        value = value.to_ascii_lowercase();
                    }
                    if key == "q" {
                        q = value
                            .parse()
                            .map_err(|_| AcceptError::BadQuality(value.clone()))?;
                    } else {
                        params.insert(key, value);
                    }
                }
            }
        }

        Ok(Self {
            kind,
            subtype,
            params,
            q,
            wildcards,
            index,
        })
    }

    /// The `type/subtype` pattern, e.g. `text/*`.
    pub fn pattern(&self) -> String {
        format!("{}/{}", self.kind, self.subtype)
    }

    /// The quality value for this range.
    pub fn quality(&self) -> f64 {
        self.q
    }

    /// True when this pattern accepts the candidate's type and subtype
    /// and every declared parameter is present with an equal value.
    fn accepts(&self, candidate: &MediaRange) -> bool {
        if self.kind != "*" && self.kind != candidate.kind {
            return false;
        }
        if self.subtype != "*" && self.subtype != candidate.subtype {
            return false;
        }
        self.params
            .iter()
            .all(|(k, v)| candidate.params.get(k) == Some(v))
    }

    fn rank(&self, other: &Self) -> Ordering {
        other
            .q
            .total_cmp(&self.q)
            .then(self.wildcards.cmp(&other.wildcards))
            .then(other.params.len().cmp(&self.params.len()))
            .then(self.index.cmp(&other.index))
    }
}

/// Ranked view of a request's `Accept` header.
#[derive(Debug, Clone)]
pub struct Acceptor {
    ranked: Vec<MediaRange>,
}

impl Acceptor {
    /// Parse one or more `Accept` header values into a ranked acceptor.
    pub fn parse<S: AsRef<str>>(values: &[S]) -> Result<Self, AcceptError> {
        let mut ranked = Vec::new();
        let mut index = 0usize;
        for value in values {
            for item in split_quoted(value.as_ref(), ',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                ranked.push(MediaRange::parse(item, index)?);
                index += 1;
            }
        }
        ranked.sort_by(MediaRange::rank);
        Ok(Self { ranked })
    }

    /// Acceptor for a request with no `Accept` header: accepts anything.
    pub fn any() -> Self {
        Self {
            ranked: vec![MediaRange {
                kind: "*".into(),
                subtype: "*".into(),
                params: BTreeMap::new(),
                q: 1.0,
                wildcards: 2,
                index: 0,
            }],
        }
    }

    /// Build an acceptor from a request's headers.
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Result<Self, AcceptError> {
        let values: Vec<&str> = headers
            .get_all(axum::http::header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            Ok(Self::any())
        } else {
            Self::parse(&values)
        }
    }

    /// Return the first ranked pattern that accepts the candidate media
    /// type, or `None` when negotiation fails (HTTP 406).
    pub fn matches(&self, candidate: &str) -> Option<&MediaRange> {
        let candidate = MediaRange::parse(candidate, 0).ok()?;
        self.ranked.iter().find(|range| range.accepts(&candidate))
    }

    /// Convenience wrapper over [`Acceptor::matches`].
    pub fn is_acceptable(&self, candidate: &str) -> bool {
        self.matches(candidate).is_some()
    }

    /// The ranked patterns, best first.
    pub fn ranked(&self) -> &[MediaRange] {
        &self.ranked
    }
}

/// Split on a delimiter while tracking double-quote state, so a quoted
/// parameter value containing the delimiter is not split apart.
/// Backslash-escaped quotes inside a quoted string do not end it.
fn split_quoted(input: &str, delim: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            c if c == delim && !in_quote => {
                out.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    out.push(&input[start..]);
    out
}

/// Strip one pair of surrounding double quotes, if present.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_ranks_first() {
        let acc = Acceptor::parse(&["text/html;q=0.9, */*;q=0.1"]).unwrap();
        let m = acc.matches("text/html").unwrap();
        assert_eq!(m.pattern(), "text/html");
    }

    #[test]
    fn wildcard_fallback_matches() {
        let acc = Acceptor::parse(&["application/json, text/*"]).unwrap();
        let m = acc.matches("text/plain").unwrap();
        assert_eq!(m.pattern(), "text/*");
    }

    #[test]
    fn fewer_wildcards_win_at_equal_quality() {
        let acc = Acceptor::parse(&["*/*, text/*, text/html"]).unwrap();
        assert_eq!(acc.ranked()[0].pattern(), "text/html");
        assert_eq!(acc.ranked()[1].pattern(), "text/*");
        assert_eq!(acc.ranked()[2].pattern(), "*/*");
    }

    #[test]
    fn explicit_parameters_rank_above_bare_patterns() {
        let acc = Acceptor::parse(&["text/html, text/html;level=1"]).unwrap();
        assert!(!acc.ranked()[0].params.is_empty());
    }

    #[test]
    fn arrival_order_is_the_stable_tie_break() {
        let acc = Acceptor::parse(&["text/html, application/xml"]).unwrap();
        assert_eq!(acc.ranked()[0].pattern(), "text/html");
    }

    #[test]
    fn quoted_comma_does_not_split() {
        let acc = Acceptor::parse(&[r#"text/plain;label="a,b", application/json"#]).unwrap();
        assert_eq!(acc.ranked().len(), 2);
        let m = acc.matches(r#"text/plain;label="a,b""#).unwrap();
        assert_eq!(m.pattern(), "text/plain");
    }

    #[test]
    fn pattern_parameters_must_match_candidate() {
        let acc = Acceptor::parse(&["text/plain;version=2"]).unwrap();
        assert!(acc.matches("text/plain").is_none());
        assert!(acc.matches("text/plain;version=1").is_none());
        assert!(acc.matches("text/plain;version=2").is_some());
    }

    #[test]
    fn candidate_may_carry_extra_parameters() {
        let acc = Acceptor::parse(&["text/plain"]).unwrap();
        assert!(acc.matches("text/plain;charset=utf-8").is_some());
    }

    #[test]
    fn charset_is_case_insensitive() {
        let acc = Acceptor::parse(&["text/html;charset=UTF-8"]).unwrap();
        assert!(acc.matches("text/html;charset=utf-8").is_some());
    }

    #[test]
    fn bare_star_means_any() {
        let acc = Acceptor::parse(&["*"]).unwrap();
        assert!(acc.matches("application/octet-stream").is_some());
    }

    #[test]
    fn star_with_concrete_subtype_is_rejected() {
        assert!(Acceptor::parse(&["*/html"]).is_err());
    }

    #[test]
    fn missing_header_accepts_anything() {
        let acc = Acceptor::any();
        assert!(acc.is_acceptable("video/mp4"));
    }

    #[test]
    fn q_parameter_is_stripped_from_params() {
        let acc = Acceptor::parse(&["text/html;q=0.5"]).unwrap();
        let range = &acc.ranked()[0];
        assert!(range.params.is_empty());
        assert!((range.quality() - 0.5).abs() < f64::EPSILON);
    }
}
