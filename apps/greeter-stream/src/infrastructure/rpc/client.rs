//! Greeter Client
//!
//! Client-side exchange patterns over any [`CallOpener`]. Each method
//! opens a call of the matching shape and drives it the way that shape
//! is meant to be driven:
//!
//! - [`GreeterClient::greet_many`]: one request, a stream of replies
//! - [`GreeterClient::greet_collect`]: a stream of requests, one reply
//! - [`GreeterClient::open_bidi`]: the raw endpoint for interleaved
//!   exchanges
//!
//! The same client runs unchanged over the in-process loopback and the
//! WebSocket connector.

use tracing::debug;

use crate::application::ports::CallOpener;
use crate::domain::call::{CallError, CallId, StreamShape};
use crate::domain::greeting::{GreetRequest, GreetReply};
use crate::infrastructure::session::{ClientCall, SessionConfig};

// =============================================================================
// Reply Stream
// =============================================================================

/// Pull-style view of a server-streaming call's responses.
#[derive(Debug)]
pub struct ReplyStream {
    call: ClientCall,
}

impl ReplyStream {
    /// Wrap a client endpoint whose request side is already finished.
    #[must_use]
    pub const fn new(call: ClientCall) -> Self {
        Self { call }
    }

    /// The underlying call's identifier.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.call.id()
    }

    /// Pull the next reply, or `Ok(None)` once the stream is over.
    ///
    /// # Errors
    ///
    /// The session's latched failure cause, including a deadline that
    /// fires while this call is suspended.
    pub async fn message(&mut self) -> Result<Option<GreetReply>, CallError> {
        self.call.recv_response().await
    }

    /// Give the underlying endpoint back.
    #[must_use]
    pub fn into_inner(self) -> ClientCall {
        self.call
    }
}

// =============================================================================
// Greeter Client
// =============================================================================

/// Shape-aware greeter call driver.
pub struct GreeterClient<O> {
    opener: O,
}

impl<O> GreeterClient<O>
where
    O: CallOpener,
{
    /// Create a client over the given channel.
    #[must_use]
    pub const fn new(opener: O) -> Self {
        Self { opener }
    }

    /// Send one greeting request and stream the replies back.
    ///
    /// The single request implicitly finishes the request direction, so
    /// the returned stream only ever pulls.
    ///
    /// # Errors
    ///
    /// Opening errors from the channel, or any call error raised while
    /// sending the request.
    pub async fn greet_many(
        &self,
        request: GreetRequest,
        config: SessionConfig,
    ) -> Result<ReplyStream, CallError> {
        let mut call = self
            .opener
            .open_call(StreamShape::ServerStreaming, config)
            .await?;
        debug!(call_id = %call.id(), name = %request.name, "opening server-streaming call");
        call.send_request(request)?;
        Ok(ReplyStream::new(call))
    }

    /// Send a batch of greeting requests and wait for the single reply.
    ///
    /// The reply only arrives after the server observed the finished
    /// request stream; a stream that ends with no reply, or carries a
    /// second one, breaks the single-response contract and fails the
    /// call.
    ///
    /// # Errors
    ///
    /// Opening errors, send errors, the session's latched failure, or
    /// [`CallError::ProtocolViolation`] on a broken response contract.
    pub async fn greet_collect<I>(
        &self,
        requests: I,
        config: SessionConfig,
    ) -> Result<GreetReply, CallError>
    where
        I: IntoIterator<Item = GreetRequest> + Send,
        I::IntoIter: Send,
    {
        let mut call = self
            .opener
            .open_call(StreamShape::ClientStreaming, config)
            .await?;
        debug!(call_id = %call.id(), "opening client-streaming call");

        for request in requests {
            call.send_request(request)?;
        }
        call.close_requests();

        let Some(reply) = call.recv_response().await? else {
            let err = CallError::ProtocolViolation(
                "client-streaming call ended without a reply".into(),
            );
            call.fail(err.clone().into_cause());
            return Err(err);
        };
        if call.recv_response().await?.is_some() {
            let err = CallError::ProtocolViolation(
                "client-streaming call produced more than one reply".into(),
            );
            call.fail(err.clone().into_cause());
            return Err(err);
        }
        Ok(reply)
    }

    /// Open a bidi call and hand the endpoint to the caller.
    ///
    /// # Errors
    ///
    /// Opening errors from the channel.
    pub async fn open_bidi(&self, config: SessionConfig) -> Result<ClientCall, CallError> {
        let call = self
            .opener
            .open_call(StreamShape::BidiStreaming, config)
            .await?;
        debug!(call_id = %call.id(), "opening bidi-streaming call");
        Ok(call)
    }

    /// Drive a full bidi exchange: send each request, await its reply.
    ///
    /// Finishes the request direction afterwards and drains the stream
    /// to its end, so the call completes cleanly.
    ///
    /// # Errors
    ///
    /// Any call error raised while sending, receiving, or draining.
    pub async fn greet_chat<I>(
        &self,
        requests: I,
        config: SessionConfig,
    ) -> Result<Vec<GreetReply>, CallError>
    where
        I: IntoIterator<Item = GreetRequest> + Send,
        I::IntoIter: Send,
    {
        let mut call = self.open_bidi(config).await?;
        let mut replies = Vec::new();

        for request in requests {
            call.send_request(request)?;
            match call.recv_response().await? {
                Some(reply) => replies.push(reply),
                None => break,
            }
        }
        call.close_requests();

        while let Some(reply) = call.recv_response().await? {
            replies.push(reply);
        }
        Ok(replies)
    }
}
