//! HTTP Sidecar
//!
//! HTTP endpoint for health checks and live call-event streaming. Used
//! by container orchestrators and by anyone who wants to watch calls
//! progress without attaching a debugger.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status with call counters
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks event wiring)
//! - `GET /events` - Call lifecycle events as Server-Sent Events

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::domain::call::CallEventKind;
use crate::infrastructure::events::{EventHubStats, SharedCallEventHub};

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Call counters since startup.
    pub calls: CallCounters,
    /// Event hub statistics.
    pub events: EventHubStats,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No failed calls.
    Healthy,
    /// Some calls failing alongside completing ones.
    Degraded,
    /// Calls are failing and none complete.
    Unhealthy,
}

/// Counters over the calls observed since startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CallCounters {
    /// Calls opened.
    pub opened: u64,
    /// Calls that reached both-closed.
    pub completed: u64,
    /// Calls that failed.
    pub failed: u64,
}

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the HTTP server.
pub struct HttpServerState {
    version: String,
    started_at: Instant,
    hub: SharedCallEventHub,
    counters: RwLock<CallCounters>,
}

impl HttpServerState {
    /// Create new server state over the given event hub.
    #[must_use]
    pub fn new(version: String, hub: SharedCallEventHub) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
            counters: RwLock::new(CallCounters::default()),
        }
    }

    /// Spawn the aggregator that keeps the call counters current.
    ///
    /// The aggregator holds its own hub subscription; a lag only skips
    /// counter updates, never call progress.
    pub fn track(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let mut rx = state.hub.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => state.record(&event.kind),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event aggregator lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Snapshot of the call counters.
    #[must_use]
    pub fn counters(&self) -> CallCounters {
        self.counters.read().clone()
    }

    fn record(&self, kind: &CallEventKind) {
        let mut counters = self.counters.write();
        match kind {
            CallEventKind::Opened => counters.opened += 1,
            CallEventKind::Completed => counters.completed += 1,
            CallEventKind::Failed { .. } => counters.failed += 1,
            _ => {}
        }
    }
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Health and events HTTP server.
pub struct HttpServer {
    port: u16,
    state: Arc<HttpServerState>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HttpServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the HTTP server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(liveness_handler))
            .route("/readyz", get(readiness_handler))
            .route("/events", get(events_handler))
            .with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HttpServerState>>) -> impl IntoResponse {
    // Ready once the event pipeline has at least one consumer wired up.
    if state.hub.subscriber_count() > 0 {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn events_handler(
    State(state): State<Arc<HttpServerState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.hub.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| match item {
        Ok(event) => match Event::default().event("call").json_data(&event) {
            Ok(sse_event) => Some(Ok(sse_event)),
            Err(err) => {
                warn!(error = %err, "failed to encode call event");
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            Some(Ok(Event::default().event("lagged").data(missed.to_string())))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn build_health_response(state: &HttpServerState) -> HealthResponse {
    let calls = state.counters();
    let status = determine_health_status(&calls);

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        calls,
        events: state.hub.stats(),
    }
}

const fn determine_health_status(calls: &CallCounters) -> HealthStatus {
    if calls.failed == 0 {
        HealthStatus::Healthy
    } else if calls.completed > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::domain::call::{CallEvent, CallId, FailureCause, StreamShape};
    use crate::infrastructure::events::CallEventHub;

    use super::*;

    fn event(kind: CallEventKind) -> CallEvent {
        CallEvent::now(CallId::new(), StreamShape::BidiStreaming, kind)
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn status_is_healthy_without_failures() {
        let calls = CallCounters {
            opened: 10,
            completed: 10,
            failed: 0,
        };
        assert_eq!(determine_health_status(&calls), HealthStatus::Healthy);
    }

    #[test]
    fn status_is_degraded_when_some_calls_fail() {
        let calls = CallCounters {
            opened: 10,
            completed: 8,
            failed: 2,
        };
        assert_eq!(determine_health_status(&calls), HealthStatus::Degraded);
    }

    #[test]
    fn status_is_unhealthy_when_nothing_completes() {
        let calls = CallCounters {
            opened: 5,
            completed: 0,
            failed: 5,
        };
        assert_eq!(determine_health_status(&calls), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn aggregator_tracks_call_lifecycle() {
        let hub = Arc::new(CallEventHub::with_defaults());
        let state = Arc::new(HttpServerState::new("test".to_string(), Arc::clone(&hub)));
        state.track();

        let _ = hub.publish(event(CallEventKind::Opened));
        let _ = hub.publish(event(CallEventKind::Completed));
        let _ = hub.publish(event(CallEventKind::Opened));
        let _ = hub.publish(event(CallEventKind::Failed {
            cause: FailureCause::DeadlineExceeded,
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;

        let counters = state.counters();
        assert_eq!(counters.opened, 2);
        assert_eq!(counters.completed, 1);
        assert_eq!(counters.failed, 1);
    }

    #[tokio::test]
    async fn health_response_reflects_counters() {
        let hub = Arc::new(CallEventHub::with_defaults());
        let state = HttpServerState::new("0.1.0".to_string(), hub);
        state.record(&CallEventKind::Opened);
        state.record(&CallEventKind::Completed);

        let response = build_health_response(&state);
        assert_eq!(response.status, HealthStatus::Healthy);
        assert_eq!(response.version, "0.1.0");
        assert_eq!(response.calls.opened, 1);
        assert_eq!(response.calls.completed, 1);
    }
}
