//! WebSocket Connector
//!
//! Client side of the transport. [`RemoteChannel`] dials the listener
//! with exponential backoff, sends the `open` frame, and hands the
//! caller a regular [`ClientCall`]; a spawned bridge task pumps frames
//! between the session's other half and the socket until the call
//! terminates.
//!
//! The bridge drives a local [`ServerCall`], so inbound responses pass
//! the same shape and ordering guards a local handler's would.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::application::ports::CallOpener;
use crate::domain::call::{CallError, CallId, CallState, FailureCause, StreamShape};
use crate::infrastructure::session::{CallSession, ClientCall, ServerCall, SessionConfig};

use super::codec::{CodecError, WireFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while dialing or speaking to the listener.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Every dial attempt failed.
    #[error("failed to connect to {url} after {attempts} attempts")]
    Exhausted {
        /// The address dialed.
        url: String,
        /// How many attempts were made.
        attempts: u32,
        /// The last dial error.
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Dial Retry
// =============================================================================

/// Retry behavior for failed dials.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier applied after each retry.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries after the first failed dial (0 = retry forever).
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 5,
        }
    }
}

/// Exponential backoff state for one dial sequence.
#[derive(Debug)]
struct RetryPolicy {
    config: RetryConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl RetryPolicy {
    const fn new(config: RetryConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next retry, or `None` once attempts ran out.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.config.max_attempts > 0 && self.attempt_count >= self.config.max_attempts {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.jittered(self.current_delay);

        let scaled = self.current_delay.as_secs_f64() * self.config.multiplier;
        let capped = scaled.min(self.config.max_delay.as_secs_f64());
        self.current_delay = if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.config.max_delay
        };

        Some(delay)
    }

    const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.config.jitter_factor;
        let offset = rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.001))
    }
}

// =============================================================================
// Remote Channel
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL of the listener, e.g. `ws://localhost:8080`.
    pub url: String,
    /// Dial retry behavior.
    pub retry: RetryConfig,
}

impl ConnectorConfig {
    /// Configuration for a URL with default retry behavior.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry: RetryConfig::default(),
        }
    }
}

/// Call channel backed by a WebSocket connection per call.
pub struct RemoteChannel {
    config: ConnectorConfig,
}

impl RemoteChannel {
    /// Create a channel dialing the configured listener.
    #[must_use]
    pub const fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    /// Dial the listener, retrying with backoff on failure.
    async fn dial(&self) -> Result<WsStream, ConnectorError> {
        let mut policy = RetryPolicy::new(self.config.retry.clone());
        loop {
            match tokio_tungstenite::connect_async(&self.config.url).await {
                Ok((ws, _response)) => {
                    debug!(url = %self.config.url, "connected");
                    return Ok(ws);
                }
                Err(err) => match policy.next_delay() {
                    Some(delay) => {
                        warn!(
                            url = %self.config.url,
                            attempt = policy.attempt_count(),
                            delay_ms = delay.as_millis(),
                            error = %err,
                            "connect failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(ConnectorError::Exhausted {
                            url: self.config.url.clone(),
                            attempts: policy.attempt_count() + 1,
                            source: err,
                        });
                    }
                },
            }
        }
    }
}

#[async_trait]
impl CallOpener for RemoteChannel {
    async fn open_call(
        &self,
        shape: StreamShape,
        config: SessionConfig,
    ) -> Result<ClientCall, CallError> {
        let mut ws = self
            .dial()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;

        let call_id = CallId::new();
        send_frame(&mut ws, &WireFrame::Open { call_id, shape })
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;

        let (client, bridge_half) = CallSession::pair_with_id(call_id, shape, config);
        tokio::spawn(run_client_bridge(ws, bridge_half));
        Ok(client)
    }
}

async fn send_frame(ws: &mut WsStream, frame: &WireFrame) -> Result<(), ConnectorError> {
    let json = frame.to_json()?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}

// =============================================================================
// Client Bridge
// =============================================================================

/// Failure cause for an error raised by applying an inbound frame.
fn ingress_cause(err: CallError) -> FailureCause {
    match err {
        CallError::ClosedChannel => FailureCause::aborted("local endpoint dropped"),
        other => other.into_cause(),
    }
}

/// Pump frames between the socket and the session's bridge half until
/// the call terminates, then forward any latched failure to the peer.
async fn run_client_bridge(mut ws: WsStream, mut half: ServerCall) {
    let call_id = half.id();
    let mut state_rx = half.state_watch();
    let mut requests_done = false;
    let mut responses_done = false;
    let mut peer_informed = false;

    while !(requests_done && responses_done) {
        tokio::select! {
            outbound = half.recv_request(), if !requests_done => match outbound {
                Ok(Some(request)) => {
                    if send_frame(&mut ws, &WireFrame::Request { payload: request }).await.is_err() {
                        half.fail(FailureCause::transport("connection lost"));
                        peer_informed = true;
                        break;
                    }
                }
                Ok(None) => {
                    requests_done = true;
                    if send_frame(&mut ws, &WireFrame::CloseRequests).await.is_err() {
                        half.fail(FailureCause::transport("connection lost"));
                        peer_informed = true;
                        break;
                    }
                }
                // Failure is latched; the post-loop handoff informs the peer.
                Err(_) => break,
            },
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => match WireFrame::from_json(&text) {
                    Ok(WireFrame::Response { payload }) => {
                        if let Err(err) = half.send_response(payload) {
                            half.fail(ingress_cause(err));
                            break;
                        }
                    }
                    Ok(WireFrame::CloseResponses) => {
                        half.close_responses();
                        responses_done = true;
                    }
                    Ok(WireFrame::Fail { cause }) => {
                        half.fail(cause);
                        peer_informed = true;
                        break;
                    }
                    Ok(frame) => {
                        warn!(call_id = %call_id, ?frame, "unexpected frame from server");
                        half.fail(FailureCause::protocol("unexpected frame from server"));
                        break;
                    }
                    Err(err) => {
                        warn!(call_id = %call_id, error = %err, "malformed frame from server");
                        half.fail(FailureCause::protocol("malformed frame from server"));
                        break;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(call_id = %call_id, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    half.fail(FailureCause::transport("connection closed mid-call"));
                    peer_informed = true;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    half.fail(FailureCause::transport(err.to_string()));
                    peer_informed = true;
                    break;
                }
            },
            _ = async { let _ = state_rx.wait_for(CallState::is_failed).await; } => break,
        }
    }

    if !peer_informed {
        if let Some(cause) = half.state().failure() {
            let _ = send_frame(&mut ws, &WireFrame::Fail { cause: cause.clone() }).await;
        }
    }
    let _ = ws.close(None).await;
    debug!(call_id = %call_id, state = %half.state(), "client bridge finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_without_jitter() {
        let mut policy = RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(400)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(800)));
    }

    #[test]
    fn backoff_is_capped_at_max_delay() {
        let mut policy = RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1500),
            multiplier: 4.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn attempts_run_out() {
        let mut policy = RetryPolicy::new(RetryConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 2,
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert_eq!(policy.attempt_count(), 2);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = RetryPolicy::new(RetryConfig {
                initial_delay: Duration::from_millis(1000),
                max_delay: Duration::from_secs(10),
                multiplier: 2.0,
                jitter_factor: 0.1,
                max_attempts: 0,
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!(millis >= 900, "delay {millis}ms is below minimum 900ms");
            assert!(millis <= 1100, "delay {millis}ms is above maximum 1100ms");
        }
    }

    #[tokio::test]
    async fn open_call_surfaces_dial_failure_as_transport() {
        // Nothing listens on the discard port; dialing must fail fast.
        let channel = RemoteChannel::new(ConnectorConfig {
            url: "ws://127.0.0.1:9".to_string(),
            retry: RetryConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(20),
                multiplier: 2.0,
                jitter_factor: 0.0,
                max_attempts: 1,
            },
        });

        let err = channel
            .open_call(StreamShape::ServerStreaming, SessionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }
}
