//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader::validate (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → passed by value to the server core and cert manager
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;

pub use loader::{load_config, ConfigError};
pub use schema::{CertConfig, ListenerConfig, RouteConfig, ServerConfig, TimeoutConfig, TlsConfig};
