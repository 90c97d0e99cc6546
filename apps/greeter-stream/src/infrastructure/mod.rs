//! Infrastructure Layer - Adapters and runtime machinery.
//!
//! This layer contains the concrete async realization of the call
//! lifecycle rules plus the adapters that connect it to the outside
//! world (sockets, HTTP, environment, logs).

/// Message channels, call sessions and the deadline watchdog.
pub mod session;

/// Client driver loops and the server-side call dispatcher.
pub mod rpc;

/// WebSocket framing, connector and listener.
pub mod transport;

/// Broadcast fan-out of call lifecycle events.
pub mod events;

/// HTTP server exposing health endpoints and the SSE event feed.
pub mod http;

/// Environment-variable configuration.
pub mod config;

/// Tracing subscriber setup.
pub mod telemetry;
