//! Embedded HTTP/HTTPS serving core.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client Request ──▶ server core ──▶ prefix router ──▶ request pipeline
//!                         │                                   │
//!                         │                         ┌─────────┴─────────┐
//!                         │                         │ content negotiator │
//!                         │                         │ resource resolver  │
//!                         │                         └───────────────────┘
//!                         │
//!                    certificate lifecycle manager
//!                    (scheduler + waiter loops, hot-swaps TLS material
//!                     under the server's exclusive-access guard)
//! ```
//!
//! The server core owns the listener and the Running/Stopping lifecycle.
//! Handlers are selected by longest-prefix match over a table of
//! registered prefixes; each prefix carries a [`resolver::Resolver`] that
//! maps the remaining path to a response descriptor. The certificate
//! manager runs independently and restarts the listener when new TLS
//! material has been issued.

// Core subsystems
pub mod config;
pub mod http;
pub mod resolver;
pub mod routing;
pub mod server;

// Certificate lifecycle
pub mod cert;
pub mod tls;

pub use config::schema::ServerConfig;
pub use server::core::ServerCore;
