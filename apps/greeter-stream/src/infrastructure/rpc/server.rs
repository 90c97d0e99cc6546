//! Call Dispatch
//!
//! Runs a [`GreeterHandler`] over one server endpoint. The dispatcher
//! owns the implicit close: a handler that returns `Ok` has said all it
//! will say, and the response direction is closed for it. A handler
//! error fails the session with the error's cause, so the peer observes
//! the same failure instead of a silent hang.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::{CallOpener, GreeterHandler};
use crate::domain::call::{CallError, CallState, StreamShape};
use crate::infrastructure::session::{CallSession, ClientCall, ServerCall, SessionConfig};

/// Serve one call to completion and return the resulting state.
///
/// Closing the response direction on return is what turns a handler's
/// `Ok` into end-of-stream for the client; handlers never close
/// explicitly. Both the close and the failure latch are idempotent, so
/// a handler that already failed the session is left as-is.
pub async fn serve_call<H>(handler: &H, mut call: ServerCall) -> CallState
where
    H: GreeterHandler + ?Sized,
{
    let call_id = call.id();
    debug!(call_id = %call_id, shape = %call.shape(), "dispatching call");

    if let Err(err) = handler.handle(&mut call).await {
        call.fail(err.into_cause());
    }
    call.close_responses();

    let state = call.state();
    debug!(call_id = %call_id, state = %state, "call dispatched");
    state
}

/// In-process call channel: every opened call is served by a spawned
/// handler task on the other end of the same session.
pub struct LoopbackChannel<H> {
    handler: Arc<H>,
}

impl<H> LoopbackChannel<H> {
    /// Create a loopback channel serving calls with `handler`.
    #[must_use]
    pub const fn new(handler: Arc<H>) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H> CallOpener for LoopbackChannel<H>
where
    H: GreeterHandler + 'static,
{
    async fn open_call(
        &self,
        shape: StreamShape,
        config: SessionConfig,
    ) -> Result<ClientCall, CallError> {
        let (client, server) = CallSession::pair(shape, config);
        let handler = Arc::clone(&self.handler);
        tokio::spawn(async move {
            serve_call(handler.as_ref(), server).await;
        });
        Ok(client)
    }
}
