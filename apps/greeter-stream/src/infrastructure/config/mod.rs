//! Configuration Module
//!
//! Environment-driven configuration for the server and client binaries.

mod settings;

pub use settings::{ClientConfig, ConfigError, ServerConfig};
