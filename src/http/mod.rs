//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server core (Axum setup, catch-all dispatch)
//!     → accept.rs (parse the Accept header into ranked patterns)
//!     → auth.rs (optional per-prefix credential check)
//!     → pipeline.rs (method gating, resolution, negotiation, streaming)
//!     → Send to client
//! ```

pub mod accept;
pub mod auth;
pub mod pipeline;

pub use accept::Acceptor;
pub use pipeline::Pipeline;
