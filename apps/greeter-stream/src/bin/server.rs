//! Greeter Stream Server Binary
//!
//! Serves streaming greeter calls over WebSocket, with health checks and
//! a live call event feed over HTTP.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin greeter-stream-server
//! ```
//!
//! # Environment Variables
//!
//! - `GREETER_BIND_ADDR`: WebSocket bind address (default: 0.0.0.0)
//! - `GREETER_PORT`: WebSocket listener port (default: 8080)
//! - `GREETER_HTTP_PORT`: Health + event feed HTTP port (default: 8081)
//! - `GREETER_RESPONSE_COUNT`: Replies per server-streaming call (default: 5)
//! - `GREETER_EVENT_CAPACITY`: Event hub channel capacity (default: 256)
//! - `RUST_LOG`: Log filter (default: info, crate at debug)

use std::sync::Arc;

use greeter_stream::infrastructure::telemetry;
use greeter_stream::{
    CallEventHub, CallListener, DemoGreeter, GreeterSettings, HttpServer, HttpServerState,
    ServerConfig,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    telemetry::init(telemetry::DEFAULT_LOG_FILTER);

    tracing::info!("Starting greeter server");

    let config = ServerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Event hub feeding the SSE endpoint and the health counters
    let events = Arc::new(CallEventHub::new(config.event_capacity));

    // HTTP server (health + event feed)
    let http_state = Arc::new(HttpServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&events),
    ));
    http_state.track();
    let http_server = HttpServer::new(config.http_port, http_state, shutdown_token.clone());

    tokio::spawn(async move {
        if let Err(e) = http_server.run().await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // WebSocket listener serving greeter calls
    let handler = Arc::new(DemoGreeter::new(GreeterSettings::new(config.response_count)));
    let listener = CallListener::bind(
        &config.listen_addr(),
        handler,
        Some(events),
        shutdown_token.clone(),
    )
    .await?;

    tokio::spawn(async move {
        if let Err(e) = listener.serve().await {
            tracing::error!(error = %e, "call listener error");
        }
    });

    tracing::info!("Greeter server ready");

    await_shutdown(shutdown_token).await;

    tracing::info!("Greeter server stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        listen_addr = %config.listen_addr(),
        http_port = config.http_port,
        response_count = config.response_count,
        event_capacity = config.event_capacity,
        "Configuration loaded"
    );
}

/// Load .env from the working directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or Ctrl+C).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
