//! Greeter Configuration Settings
//!
//! Configuration types for the server and client binaries, loaded from
//! environment variables. Every variable is optional: unset or unparsable
//! values fall back to defaults suited to local development.

use std::time::Duration;

/// Configuration for the greeter server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: String,
    /// WebSocket listener port.
    pub port: u16,
    /// Health check and event stream HTTP port.
    pub http_port: u16,
    /// Replies sent per server-streaming call.
    pub response_count: u32,
    /// Call event hub channel capacity.
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            http_port: 8081,
            response_count: 5,
            event_capacity: 256,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is set to an empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: env_string("GREETER_BIND_ADDR", &Self::default().bind_addr)?,
            port: parse_env_u16("GREETER_PORT", Self::default().port),
            http_port: parse_env_u16("GREETER_HTTP_PORT", Self::default().http_port),
            response_count: parse_env_u32(
                "GREETER_RESPONSE_COUNT",
                Self::default().response_count,
            ),
            event_capacity: parse_env_usize(
                "GREETER_EVENT_CAPACITY",
                Self::default().event_capacity,
            ),
        })
    }

    /// Socket address string for the WebSocket listener.
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Configuration for the greeter client binary.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to dial, as `host:port` or a full `ws://` URL.
    pub server_addr: String,
    /// Name carried in greeting requests.
    pub name: String,
    /// Requests sent per client-streaming and bidi demo loop.
    pub request_count: u32,
    /// Deadline armed on each deadline-bearing call.
    pub call_deadline: Duration,
    /// Dial attempts before giving up (0 = retry forever).
    pub connect_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "localhost:8080".to_string(),
            name: "world".to_string(),
            request_count: 5,
            call_deadline: Duration::from_millis(1000),
            connect_attempts: 5,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is set to an empty value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_addr: env_string("GREETER_SERVER_ADDR", &Self::default().server_addr)?,
            name: env_string("GREETER_NAME", &Self::default().name)?,
            request_count: parse_env_u32("GREETER_REQUEST_COUNT", Self::default().request_count),
            call_deadline: parse_env_duration_millis(
                "GREETER_CALL_DEADLINE_MS",
                Self::default().call_deadline,
            ),
            connect_attempts: parse_env_u32(
                "GREETER_CONNECT_ATTEMPTS",
                Self::default().connect_attempts,
            ),
        })
    }

    /// WebSocket URL for the greeter endpoint.
    ///
    /// A bare `host:port` value gains the `ws://` scheme; values that
    /// already carry a scheme pass through untouched.
    #[must_use]
    pub fn server_url(&self) -> String {
        if self.server_addr.starts_with("ws://") || self.server_addr.starts_with("wss://") {
            self.server_addr.clone()
        } else {
            format!("ws://{}", self.server_addr)
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable is set but empty.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn env_string(key: &str, default: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
        Ok(value) => Ok(value),
        Err(_) => Ok(default.to_string()),
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
