//! Greeter Stream Client Binary
//!
//! Runs the three streaming demos against a greeter server: a
//! server-streaming greeting burst, a client-streaming collect and a
//! bidirectional echo exchange.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin greeter-stream-client
//! ```
//!
//! # Environment Variables
//!
//! - `GREETER_SERVER_ADDR`: Server address (default: localhost:8080)
//! - `GREETER_NAME`: Name carried in greeting requests (default: world)
//! - `GREETER_REQUEST_COUNT`: Requests per streaming loop (default: 5)
//! - `GREETER_CALL_DEADLINE_MS`: Per-call deadline in ms (default: 1000)
//! - `GREETER_CONNECT_ATTEMPTS`: Dial attempts before giving up (default: 5)
//! - `RUST_LOG`: Log filter (default: info, crate at debug)

use greeter_stream::infrastructure::telemetry;
use greeter_stream::infrastructure::transport::{ConnectorConfig, RetryConfig};
use greeter_stream::{ClientConfig, GreetRequest, GreeterClient, RemoteChannel, SessionConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    telemetry::init(telemetry::DEFAULT_LOG_FILTER);

    let config = ClientConfig::from_env()?;
    tracing::info!(
        server_url = %config.server_url(),
        name = %config.name,
        "Starting greeter client"
    );

    let connector = ConnectorConfig {
        url: config.server_url(),
        retry: RetryConfig {
            max_attempts: config.connect_attempts,
            ..RetryConfig::default()
        },
    };
    let client = GreeterClient::new(RemoteChannel::new(connector));

    run_server_streaming(&client, &config).await?;
    run_client_streaming(&client, &config).await?;
    run_bidi_streaming(&client, &config).await?;

    tracing::info!("All demos complete");
    Ok(())
}

/// One greeting request in, a burst of numbered greetings back.
async fn run_server_streaming(
    client: &GreeterClient<RemoteChannel>,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("--- server-streaming demo ---");

    let mut replies = client
        .greet_many(
            GreetRequest::new(config.name.clone()),
            SessionConfig::with_deadline(config.call_deadline),
        )
        .await?;

    while let Some(reply) = replies.message().await? {
        tracing::info!(message = %reply.message, "reply");
    }
    Ok(())
}

/// Stream numbered requests up, collect the single closing reply.
async fn run_client_streaming(
    client: &GreeterClient<RemoteChannel>,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("--- client-streaming demo ---");

    let requests =
        (0..config.request_count).map(|n| GreetRequest::new(format!("stream client rpc {n}")));
    let reply = client
        .greet_collect(requests, SessionConfig::with_deadline(config.call_deadline))
        .await?;

    tracing::info!(message = %reply.message, "reply");
    Ok(())
}

/// Alternate sends and receives over a bidirectional call.
async fn run_bidi_streaming(
    client: &GreeterClient<RemoteChannel>,
    config: &ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("--- bidi-streaming demo ---");

    let requests =
        (0..config.request_count).map(|n| GreetRequest::new(format!("{}_{n}", config.name)));
    let replies = client.greet_chat(requests, SessionConfig::default()).await?;

    for reply in replies {
        tracing::info!(message = %reply.message, "reply");
    }
    Ok(())
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
