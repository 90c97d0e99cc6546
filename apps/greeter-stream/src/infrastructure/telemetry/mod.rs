//! Logging Setup
//!
//! Installs the global `tracing` subscriber for the binaries: an
//! `EnvFilter` honoring `RUST_LOG`, layered with a console formatter.
//!
//! # Usage
//!
//! ```ignore
//! use greeter_stream::infrastructure::telemetry;
//!
//! telemetry::init(telemetry::DEFAULT_LOG_FILTER);
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter applied when `RUST_LOG` is unset.
///
/// Keeps the crate chatty while quieting the WebSocket stack.
pub const DEFAULT_LOG_FILTER: &str =
    "info,greeter_stream=debug,tungstenite=warn,tokio_tungstenite=warn";

/// Initialize the tracing subscriber for a binary.
///
/// Honors `RUST_LOG` when set; otherwise applies `default_filter`.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
