//! Certificate lifecycle management.
//!
//! # Data Flow
//! ```text
//! scheduler loop (cert/manager.rs)
//!     → wakes at next-midnight + offset + interval
//!     → under the server's exclusive guard, spawns a renewal job
//!       (single-flight; a second request observes the in-flight gate)
//!
//! renewal job (cert/provider.rs)
//!     → external issuance command, exit 0 = success
//!     → lease sidecar records the validity window
//!
//! waiter loop (cert/manager.rs)
//!     → receives the job result from a capacity-1 channel
//!     → on success: install material, hot-swap rustls, stop+start
//!       under the same exclusive guard
//!     → on failure: keep the old certificate, wait for the next wake
//! ```

pub mod manager;
pub mod provider;

pub use manager::{CertError, CertManager};
pub use provider::{CommandProvider, MaterialError, MaterialProvider};
