#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Greeter Stream - Streaming Call Lifecycle Demo
//!
//! A client/server pair exercising the three streaming call shapes
//! (server-streaming, client-streaming, bidirectional) on top of a
//! shared call session engine. The engine owns the per-call state machine
//! (open, half-closed per direction, closed, failed) and the half-close
//! discipline each shape imposes; a WebSocket transport carries the calls
//! between processes and an event hub fans call lifecycle events out to
//! HTTP subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure call lifecycle rules and payload types
//!   - `call`: Shapes, directions, the call state machine, error taxonomy
//!   - `greeting`: Request/reply payloads and reply formatting
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for greeter handlers and call channels
//!   - `services`: The reference greeter handler
//!
//! - **Infrastructure**: Adapters and runtime machinery
//!   - `session`: Message channels, call sessions, deadline watchdog
//!   - `rpc`: Client driver loops and the server-side call dispatcher
//!   - `transport`: WebSocket framing, connector and listener
//!   - `events`: Broadcast fan-out of call lifecycle events
//!   - `http`: Health endpoints and the SSE event feed
//!   - `config`: Environment-variable configuration
//!   - `telemetry`: Tracing subscriber setup
//!
//! # Data Flow
//!
//! ```text
//! GreeterClient ──► requests channel ──► transport ──► serve_call ──► handler
//!               ◄── responses channel ◄── transport ◄───────────────┘
//!                                          │
//!                                          └──► CallEventHub ──► SSE clients
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Call lifecycle rules and payload types with no runtime deps.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and runtime machinery.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::call::{
    CallError, CallEvent, CallEventKind, CallId, CallState, Direction, FailureCause, StreamShape,
};
pub use domain::greeting::{GreetRequest, GreetReply};

// Application ports and services
pub use application::ports::{CallOpener, GreeterHandler};
pub use application::services::{DemoGreeter, GreeterSettings};

// Session engine
pub use infrastructure::session::{CallSession, ClientCall, ServerCall, SessionConfig};

// Call driver and dispatcher
pub use infrastructure::rpc::{GreeterClient, LoopbackChannel, ReplyStream, serve_call};

// Transport
pub use infrastructure::transport::{
    CallListener, ConnectorConfig, ConnectorError, RemoteChannel, RetryConfig, ServerError,
    WireFrame,
};

// Event hub
pub use infrastructure::events::{CallEventHub, EventHubStats, SharedCallEventHub};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, ServerConfig};

// HTTP server (health + SSE)
pub use infrastructure::http::{HttpServer, HttpServerError, HttpServerState};

// Telemetry
pub use infrastructure::telemetry::{DEFAULT_LOG_FILTER, init as init_telemetry};
