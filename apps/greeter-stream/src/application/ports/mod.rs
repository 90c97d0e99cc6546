//! Port Interfaces
//!
//! The contracts between the greeter application and the call plumbing,
//! following the Hexagonal Architecture pattern.
//!
//! ## Driver Ports (Inbound)
//!
//! - [`GreeterHandler`]: server-side behavior invoked once per call
//!
//! ## Driven Ports (Outbound)
//!
//! - [`CallOpener`]: how a client obtains a linked call endpoint,
//!   implemented in-process (loopback) and over WebSocket (remote)

use async_trait::async_trait;

use crate::domain::call::{CallError, StreamShape};
use crate::infrastructure::session::{ClientCall, ServerCall, SessionConfig};

/// Server-side behavior for one call.
///
/// The dispatcher hands the handler its endpoint and treats a normal
/// return as the end of the response direction, so handlers never need
/// to close explicitly. An `Err` return fails the session with the
/// error's cause.
#[async_trait]
pub trait GreeterHandler: Send + Sync {
    /// Serve one call to completion of the handler's part in it.
    async fn handle(&self, call: &mut ServerCall) -> Result<(), CallError>;
}

/// Source of client call endpoints.
///
/// Implementations wire the returned endpoint to a serving peer, either
/// directly in-process or across a connection.
#[async_trait]
pub trait CallOpener: Send + Sync {
    /// Open a call of the given shape and return the client endpoint.
    ///
    /// # Errors
    ///
    /// [`CallError::Transport`] when the peer cannot be reached or
    /// rejects the call.
    async fn open_call(
        &self,
        shape: StreamShape,
        config: SessionConfig,
    ) -> Result<ClientCall, CallError>;
}
