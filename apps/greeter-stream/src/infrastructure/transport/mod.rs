//! WebSocket Transport
//!
//! Links a client process and a server process into one logical call.
//! Both processes run the same session engine; the transport only pumps
//! frames between a local endpoint and the socket, so every ordering
//! and shape rule is enforced at each ingress exactly as it is
//! in-process.
//!
//! ```text
//!   client process                     server process
//!   ┌─────────────────────┐            ┌─────────────────────┐
//!   │ ClientCall (user)   │            │ ServerCall (handler)│
//!   │      ↕ session      │            │      ↕ session      │
//!   │ ServerCall (bridge) │ ←─ WS ───→ │ ClientCall (bridge) │
//!   └─────────────────────┘            └─────────────────────┘
//! ```
//!
//! A connection carries calls sequentially: the connector dials one
//! connection per call, the listener serves any number of calls per
//! connection, one at a time. Failures latched on either side travel as
//! `fail` frames so both sessions terminate with the same cause.

pub mod client;
pub mod codec;
pub mod server;

pub use client::{ConnectorConfig, ConnectorError, RemoteChannel, RetryConfig};
pub use codec::{CodecError, WireFrame};
pub use server::{CallListener, ServerError};
