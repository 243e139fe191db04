//! Server core subsystem.
//!
//! # Data Flow
//! ```text
//! start()
//!     → activate queued prefixes, configure resolvers
//!     → build Axum router (catch-all dispatch + middleware)
//!     → bind via axum-server (plain or rustls), fresh Handle
//!     → lifecycle Idle → Running
//!
//! stop(delay)
//!     → lifecycle Running → Stopping (adds are queued)
//!     → graceful_shutdown(delay), await the serve task
//!     → deconfigure resolvers, lifecycle → Idle (restartable)
//!
//! shutdown(delay)
//!     → as stop, then clears the prefix table; terminal
//! ```

pub mod core;

pub use core::{Lifecycle, ServerCore, ServerError};
