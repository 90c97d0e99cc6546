//! Application Services
//!
//! The demo greeter: one handler covering all three call shapes,
//! dispatching on the shape the call was opened with.
//!
//! - server-streaming: one request fans out into a fixed burst of
//!   numbered greetings
//! - client-streaming: requests are drained and acknowledged with a
//!   single closing reply
//! - bidi-streaming: every request is echoed back with a running
//!   counter appended

use async_trait::async_trait;
use tracing::debug;

use crate::application::ports::GreeterHandler;
use crate::domain::call::{CallError, StreamShape};
use crate::domain::greeting::GreetReply;
use crate::infrastructure::session::ServerCall;

/// Reply that closes out a client-streaming exchange.
const CLOSING_REPLY: &str = "over";

// =============================================================================
// Settings
// =============================================================================

/// Tunable behavior of the demo greeter.
#[derive(Debug, Clone)]
pub struct GreeterSettings {
    /// Number of replies a server-streaming call fans out.
    pub response_count: u32,
}

impl GreeterSettings {
    /// Settings with an explicit fan-out count.
    #[must_use]
    pub const fn new(response_count: u32) -> Self {
        Self { response_count }
    }
}

impl Default for GreeterSettings {
    fn default() -> Self {
        Self { response_count: 5 }
    }
}

// =============================================================================
// Demo Greeter
// =============================================================================

/// Greeter behavior for every shape, mirrored on the wire demos.
#[derive(Debug)]
pub struct DemoGreeter {
    settings: GreeterSettings,
}

impl DemoGreeter {
    /// Create a greeter with the given settings.
    #[must_use]
    pub const fn new(settings: GreeterSettings) -> Self {
        Self { settings }
    }

    /// One request in, `response_count` numbered greetings out.
    async fn greet_stream(&self, call: &mut ServerCall) -> Result<(), CallError> {
        let Some(request) = call.recv_request().await? else {
            return Err(CallError::ProtocolViolation(
                "server-streaming call carried no request".into(),
            ));
        };

        debug!(call_id = %call.id(), name = %request.name, "greeting burst");
        for i in 0..self.settings.response_count {
            call.send_response(GreetReply::new(format!("hello {}---{i}", request.name)))?;
        }
        Ok(())
    }

    /// Drain the request stream, then acknowledge it with one reply.
    async fn collect_greetings(&self, call: &mut ServerCall) -> Result<(), CallError> {
        let mut received = 0_u64;
        while let Some(request) = call.recv_request().await? {
            debug!(call_id = %call.id(), name = %request.name, "client stream message");
            received += 1;
        }

        debug!(call_id = %call.id(), received, "client stream drained");
        call.send_response(GreetReply::new(CLOSING_REPLY))
    }

    /// Echo each request back with a running counter appended.
    async fn echo_greetings(&self, call: &mut ServerCall) -> Result<(), CallError> {
        let mut n = 0_u64;
        while let Some(request) = call.recv_request().await? {
            call.send_response(GreetReply::new(format!("server stream: {}_{n}", request.name)))?;
            n += 1;
        }
        Ok(())
    }
}

#[async_trait]
impl GreeterHandler for DemoGreeter {
    async fn handle(&self, call: &mut ServerCall) -> Result<(), CallError> {
        match call.shape() {
            StreamShape::ServerStreaming => self.greet_stream(call).await,
            StreamShape::ClientStreaming => self.collect_greetings(call).await,
            StreamShape::BidiStreaming => self.echo_greetings(call).await,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
