//! Prefix routing.
//!
//! # Data Flow
//! ```text
//! Incoming Request path
//!     → prefix.rs (longest-prefix lookup, segment walk)
//!     → Return: matched entry (prefix + resolver) or NoMatch
//!
//! NoMatch
//!     → root.rs (trailing-slash redirect, prefix listing, or 404)
//! ```
//!
//! # Design Decisions
//! - Prefixes normalized to `/…/` form; `None`/empty means `"/"`
//! - No regex in the hot path; lookup cost is O(path depth)
//! - Exact duplicates rejected; a prefix nested under (or above) an
//!   existing one is accepted with a warning diagnostic
//! - Additions while the server is stopping are queued and activated
//!   on the next start

pub mod prefix;
pub mod root;

pub use prefix::{PrefixRouter, RouterError};
