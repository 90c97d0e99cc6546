//! Call Sessions
//!
//! The concurrent realization of the call lifecycle rules: one session
//! per call, two message channels (requests, responses), and the shared
//! terminal state both ends observe. [`CallSession::pair`] hands out the
//! two linked endpoints; [`ClientCall`] and [`ServerCall`] enforce the
//! shape-specific ordering rules at every send site and surface the
//! latched failure cause to every later operation.
//!
//! Terminal-state transitions are serialized through a single
//! `tokio::sync::watch` writer, so concurrent half-closes from both
//! sides resolve deterministically to `BothClosed`. A receive suspended
//! on an open, empty channel is raced against the failure watch, which
//! is what lets the deadline watchdog (or a peer failure) unblock it.
//!
//! Channels are unbounded, so `send` never suspends; a bounded variant
//! would make it a suspension point and was deliberately not built.

pub mod channel;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::domain::call::{
    CallError, CallEvent, CallEventKind, CallId, CallState, Direction, FailureCause, StreamShape,
};
use crate::domain::greeting::{GreetRequest, GreetReply};
use crate::infrastructure::events::SharedCallEventHub;

use channel::{MessageReceiver, MessageSender, message_channel};

// =============================================================================
// Configuration
// =============================================================================

/// Per-session knobs supplied by whoever opens the call.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Abort the call with `DeadlineExceeded` once this much time passes.
    pub deadline: Option<Duration>,
    /// Hub to notify of lifecycle events. Never gates correctness.
    pub events: Option<SharedCallEventHub>,
}

impl SessionConfig {
    /// Configuration with only a deadline set.
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
            events: None,
        }
    }
}

// =============================================================================
// Shared Core
// =============================================================================

/// State shared by both endpoints of one call.
#[derive(Debug)]
struct Shared {
    id: CallId,
    shape: StreamShape,
    state: watch::Sender<CallState>,
    events: Option<SharedCallEventHub>,
}

impl Shared {
    /// Record that one direction announced no more messages.
    fn close_direction(&self, direction: Direction) {
        let mut reached: Option<CallState> = None;
        self.state.send_if_modified(|state| {
            let next = state.clone().after_close(direction);
            if next == *state {
                false
            } else {
                *state = next;
                reached = Some(state.clone());
                true
            }
        });

        if let Some(state) = reached {
            debug!(call_id = %self.id, direction = %direction, state = %state, "direction closed");
            self.emit(CallEventKind::HalfClosed { direction });
            if state == CallState::BothClosed {
                self.emit(CallEventKind::Completed);
            }
        }
    }

    /// Latch a failure. Returns `true` only for the call that latched it;
    /// later causes lose and terminal sessions are left untouched.
    fn fail(&self, cause: FailureCause) -> bool {
        let mut latched = false;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = CallState::Failed {
                    cause: cause.clone(),
                };
                latched = true;
                true
            }
        });

        if latched {
            warn!(call_id = %self.id, cause = %cause, "call failed");
            self.emit(CallEventKind::Failed { cause });
        }
        latched
    }

    /// The operation error for an already-latched failure, if any.
    fn failure_error(&self) -> Option<CallError> {
        self.state
            .borrow()
            .failure()
            .cloned()
            .map(CallError::from_cause)
    }

    fn emit(&self, kind: CallEventKind) {
        if let Some(hub) = &self.events {
            let _ = hub.publish(CallEvent::now(self.id, self.shape, kind));
        }
    }
}

/// Operation error for a state observed failed via the watch.
fn error_from_state(state: &CallState) -> CallError {
    state.failure().cloned().map_or_else(
        || CallError::SessionFailed(FailureCause::aborted("session terminated")),
        CallError::from_cause,
    )
}

/// Race a channel receive against the session failure latch.
///
/// Buffered messages win over a concurrently latched failure; a receive
/// actually suspended on an empty channel is woken with the failure.
/// End-of-stream is only clean while no failure is latched: the channel
/// also closes during failure teardown, and that closure must not read
/// as a completed stream.
async fn recv_or_fail<T>(
    rx: &mut MessageReceiver<T>,
    state_rx: &mut watch::Receiver<CallState>,
) -> Result<Option<T>, CallError> {
    tokio::select! {
        biased;
        message = rx.recv() => match message {
            Some(message) => Ok(Some(message)),
            None => {
                let state = state_rx.borrow();
                if state.is_failed() {
                    Err(error_from_state(&state))
                } else {
                    Ok(None)
                }
            }
        },
        changed = async {
            state_rx
                .wait_for(CallState::is_failed)
                .await
                .map(|state| state.clone())
        } => Err(match changed {
            Ok(state) => error_from_state(&state),
            Err(_) => CallError::Transport("session state channel dropped".to_string()),
        }),
    }
}

// =============================================================================
// Session Factory
// =============================================================================

/// Factory for linked call endpoint pairs.
pub struct CallSession;

impl CallSession {
    /// Create a connected client/server endpoint pair with a fresh id.
    ///
    /// Must run inside a tokio runtime when `config.deadline` is set; the
    /// deadline is enforced by a spawned watchdog task that latches
    /// `DeadlineExceeded` unless the call terminates first.
    #[must_use]
    pub fn pair(shape: StreamShape, config: SessionConfig) -> (ClientCall, ServerCall) {
        Self::pair_with_id(CallId::new(), shape, config)
    }

    /// Create a connected pair under a caller-supplied id, so both
    /// processes of a remote call log and publish the same identifier.
    #[must_use]
    pub fn pair_with_id(
        id: CallId,
        shape: StreamShape,
        config: SessionConfig,
    ) -> (ClientCall, ServerCall) {
        let (state_tx, state_rx) = watch::channel(CallState::Open);
        let shared = Arc::new(Shared {
            id,
            shape,
            state: state_tx,
            events: config.events,
        });

        let (request_tx, request_rx) = message_channel();
        let (response_tx, response_rx) = message_channel();

        debug!(call_id = %id, shape = %shape, "call session opened");
        shared.emit(CallEventKind::Opened);

        if let Some(deadline) = config.deadline {
            spawn_deadline_watchdog(Arc::clone(&shared), state_rx.clone(), deadline);
        }

        let client = ClientCall {
            shared: Arc::clone(&shared),
            requests: request_tx,
            responses: response_rx,
            state_rx: state_rx.clone(),
            requests_sent: 0,
        };
        let server = ServerCall {
            shared,
            requests: request_rx,
            responses: response_tx,
            state_rx,
            requests_received: 0,
            responses_sent: 0,
        };
        (client, server)
    }
}

/// Abort the call once the deadline elapses, unless it terminates first.
fn spawn_deadline_watchdog(
    shared: Arc<Shared>,
    mut state_rx: watch::Receiver<CallState>,
    deadline: Duration,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(deadline) => {
                if shared.fail(FailureCause::DeadlineExceeded) {
                    debug!(call_id = %shared.id, deadline = ?deadline, "call deadline elapsed");
                }
            }
            _ = state_rx.wait_for(CallState::is_terminal) => {}
        }
    });
}

// =============================================================================
// Client Endpoint
// =============================================================================

/// The client's view of one call: send requests, receive responses.
#[derive(Debug)]
pub struct ClientCall {
    shared: Arc<Shared>,
    requests: MessageSender<GreetRequest>,
    responses: MessageReceiver<GreetReply>,
    state_rx: watch::Receiver<CallState>,
    requests_sent: u64,
}

impl ClientCall {
    /// The call's identifier.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.shared.id
    }

    /// The call's shape.
    #[must_use]
    pub fn shape(&self) -> StreamShape {
        self.shared.shape
    }

    /// Snapshot of the shared terminal state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    /// Fresh watch over the shared state, for plumbing that needs to
    /// observe transitions without holding the endpoint.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// Send one request towards the server.
    ///
    /// Under server-streaming the single permitted request implicitly
    /// half-closes the client direction; a second send is a protocol
    /// violation and fails the session.
    ///
    /// # Errors
    ///
    /// [`CallError::ClosedChannel`] after `close_requests`, the latched
    /// failure after the session failed, or
    /// [`CallError::ProtocolViolation`] on a shape rule breach.
    pub fn send_request(&mut self, request: GreetRequest) -> Result<(), CallError> {
        if let Some(err) = self.shared.failure_error() {
            return Err(err);
        }
        if self.shared.shape == StreamShape::ServerStreaming && self.requests_sent > 0 {
            let err =
                CallError::ProtocolViolation("server-streaming carries exactly one request".into());
            self.shared.fail(err.clone().into_cause());
            return Err(err);
        }

        self.requests.send(request)?;
        self.requests_sent += 1;

        if self.shared.shape == StreamShape::ServerStreaming {
            self.close_requests();
        }
        Ok(())
    }

    /// Announce that no more requests will be sent. Idempotent.
    ///
    /// The shared state transitions before the channel closes, so a
    /// server that already observed end-of-stream is guaranteed to see
    /// the client half-close reflected in the session state.
    pub fn close_requests(&mut self) {
        if self.requests.is_closed() {
            return;
        }
        self.shared.close_direction(Direction::ClientToServer);
        self.requests.close();
    }

    /// Pull the next response, or `Ok(None)` at end-of-stream.
    ///
    /// Suspends while the response direction is open and empty.
    ///
    /// # Errors
    ///
    /// The latched failure cause once the session failed, including
    /// while suspended: a deadline or peer failure wakes this call.
    pub async fn recv_response(&mut self) -> Result<Option<GreetReply>, CallError> {
        if let Some(err) = self.shared.failure_error() {
            return Err(err);
        }
        recv_or_fail(&mut self.responses, &mut self.state_rx).await
    }

    /// Fail the session from the client side.
    pub fn fail(&mut self, cause: FailureCause) {
        self.shared.fail(cause);
    }

    /// Wait until the call reaches a terminal state and return it.
    pub async fn terminated(&mut self) -> CallState {
        let waited = self
            .state_rx
            .wait_for(CallState::is_terminal)
            .await
            .map(|state| state.clone());
        match waited {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

// =============================================================================
// Server Endpoint
// =============================================================================

/// The server's view of one call: receive requests, send responses.
pub struct ServerCall {
    shared: Arc<Shared>,
    requests: MessageReceiver<GreetRequest>,
    responses: MessageSender<GreetReply>,
    state_rx: watch::Receiver<CallState>,
    requests_received: u64,
    responses_sent: u64,
}

impl ServerCall {
    /// The call's identifier.
    #[must_use]
    pub fn id(&self) -> CallId {
        self.shared.id
    }

    /// The call's shape.
    #[must_use]
    pub fn shape(&self) -> StreamShape {
        self.shared.shape
    }

    /// Snapshot of the shared terminal state.
    #[must_use]
    pub fn state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    /// Fresh watch over the shared state, for plumbing that needs to
    /// observe transitions without holding the endpoint.
    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// Pull the next request, or `Ok(None)` once the client half-closed
    /// and the buffer drained.
    ///
    /// # Errors
    ///
    /// The latched failure cause once the session failed, including
    /// while suspended.
    pub async fn recv_request(&mut self) -> Result<Option<GreetRequest>, CallError> {
        if let Some(err) = self.shared.failure_error() {
            return Err(err);
        }
        let message = recv_or_fail(&mut self.requests, &mut self.state_rx).await?;
        if let Some(request) = &message {
            debug!(call_id = %self.shared.id, name = %request.name, seq = self.requests_received, "request received");
            self.shared.emit(CallEventKind::RequestReceived {
                seq: self.requests_received,
            });
            self.requests_received += 1;
        }
        Ok(message)
    }

    /// Send one response towards the client.
    ///
    /// Under client-streaming a response is permitted only after the
    /// client half-close has been observed, and only once; breaching
    /// either rule is a protocol violation that fails the session.
    ///
    /// # Errors
    ///
    /// [`CallError::ClosedChannel`] after `close_responses`, the latched
    /// failure after the session failed, or
    /// [`CallError::ProtocolViolation`] on a shape rule breach.
    pub fn send_response(&mut self, reply: GreetReply) -> Result<(), CallError> {
        if let Some(err) = self.shared.failure_error() {
            return Err(err);
        }
        if self.shared.shape == StreamShape::ClientStreaming {
            if !self
                .state_rx
                .borrow()
                .direction_closed(Direction::ClientToServer)
            {
                let err = CallError::ProtocolViolation(
                    "client-streaming reply before client half-close".into(),
                );
                self.shared.fail(err.clone().into_cause());
                return Err(err);
            }
            if self.responses_sent > 0 {
                let err = CallError::ProtocolViolation(
                    "client-streaming carries exactly one response".into(),
                );
                self.shared.fail(err.clone().into_cause());
                return Err(err);
            }
        }

        self.responses.send(reply)?;
        self.shared.emit(CallEventKind::ResponseSent {
            seq: self.responses_sent,
        });
        self.responses_sent += 1;
        Ok(())
    }

    /// Announce that no more responses will be sent. Idempotent.
    pub fn close_responses(&mut self) {
        if self.responses.is_closed() {
            return;
        }
        self.shared.close_direction(Direction::ServerToClient);
        self.responses.close();
    }

    /// Fail the session from the server side.
    pub fn fail(&mut self, cause: FailureCause) {
        self.shared.fail(cause);
    }

    /// Wait until the call reaches a terminal state and return it.
    pub async fn terminated(&mut self) -> CallState {
        let waited = self
            .state_rx
            .wait_for(CallState::is_terminal)
            .await
            .map(|state| state.clone());
        match waited {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::infrastructure::events::CallEventHub;

    use super::*;

    fn open_pair(shape: StreamShape) -> (ClientCall, ServerCall) {
        CallSession::pair(shape, SessionConfig::default())
    }

    #[tokio::test]
    async fn request_flows_client_to_server() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        client.send_request(GreetRequest::new("world")).unwrap();

        let request = server.recv_request().await.unwrap().unwrap();
        assert_eq!(request.name, "world");
    }

    #[tokio::test]
    async fn response_flows_server_to_client() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        server.send_response(GreetReply::new("hi")).unwrap();

        let reply = client.recv_response().await.unwrap().unwrap();
        assert_eq!(reply.message, "hi");
    }

    #[tokio::test]
    async fn close_requests_yields_end_of_stream() {
        let (mut client, mut server) = open_pair(StreamShape::ClientStreaming);

        client.send_request(GreetRequest::new("a")).unwrap();
        client.close_requests();

        assert_eq!(
            server.recv_request().await.unwrap().unwrap().name,
            "a"
        );
        assert_eq!(server.recv_request().await.unwrap(), None);
        assert_eq!(client.state(), CallState::ClientHalfClosed);
    }

    #[tokio::test]
    async fn send_after_close_is_closed_channel() {
        let (mut client, _server) = open_pair(StreamShape::BidiStreaming);

        client.close_requests();

        assert_eq!(
            client.send_request(GreetRequest::new("late")),
            Err(CallError::ClosedChannel)
        );
    }

    #[tokio::test]
    async fn server_streaming_auto_half_closes_after_single_request() {
        let (mut client, _server) = open_pair(StreamShape::ServerStreaming);

        client.send_request(GreetRequest::new("world")).unwrap();
        assert_eq!(client.state(), CallState::ClientHalfClosed);

        // The shape guard outranks the closed channel: a second send is
        // a violation that fails the session.
        let err = client.send_request(GreetRequest::new("again")).unwrap_err();
        assert!(matches!(err, CallError::ProtocolViolation(_)));
        assert!(client.state().is_failed());
    }

    #[tokio::test]
    async fn client_streaming_reply_before_half_close_is_violation() {
        let (mut client, mut server) = open_pair(StreamShape::ClientStreaming);

        let err = server.send_response(GreetReply::new("early")).unwrap_err();
        assert!(matches!(err, CallError::ProtocolViolation(_)));

        // The violation is fatal: the client's next operation fails too.
        let client_err = client.recv_response().await.unwrap_err();
        assert!(matches!(client_err, CallError::SessionFailed(_)));
    }

    #[tokio::test]
    async fn client_streaming_allows_single_reply_after_half_close() {
        let (mut client, mut server) = open_pair(StreamShape::ClientStreaming);

        client.close_requests();
        assert_eq!(server.recv_request().await.unwrap(), None);

        server.send_response(GreetReply::new("over")).unwrap();
        let err = server.send_response(GreetReply::new("extra")).unwrap_err();
        assert!(matches!(err, CallError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn both_closes_reach_both_closed() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        client.close_requests();
        server.close_responses();

        assert_eq!(client.state(), CallState::BothClosed);
        assert_eq!(server.state(), CallState::BothClosed);
    }

    #[tokio::test]
    async fn concurrent_closes_resolve_deterministically() {
        // Both sides close at approximately the same time, many times over;
        // every run must settle on BothClosed with no lost transition.
        for _ in 0..100 {
            let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

            let close_client = tokio::spawn(async move {
                client.close_requests();
                client
            });
            let close_server = tokio::spawn(async move {
                server.close_responses();
                server
            });

            let client = close_client.await.unwrap();
            let server = close_server.await.unwrap();

            assert_eq!(client.state(), CallState::BothClosed);
            assert_eq!(server.state(), CallState::BothClosed);
        }
    }

    #[tokio::test]
    async fn failure_unblocks_pending_receive() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        let pending = tokio::spawn(async move { client.recv_response().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        server.fail(FailureCause::transport("socket reset"));

        let result = timeout(Duration::from_secs(1), pending).await.unwrap();
        assert_eq!(
            result.unwrap(),
            Err(CallError::Transport("socket reset".to_string()))
        );
    }

    #[tokio::test]
    async fn teardown_close_after_failure_still_reports_the_failure() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        let pending = tokio::spawn(async move { client.recv_response().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Failure teardown closes the channel right after the latch; the
        // woken receive must report the failure, not end-of-stream.
        server.fail(FailureCause::protocol("double reply"));
        server.close_responses();

        let result = timeout(Duration::from_secs(1), pending).await.unwrap();
        assert_eq!(
            result.unwrap(),
            Err(CallError::SessionFailed(FailureCause::protocol(
                "double reply"
            )))
        );
    }

    #[tokio::test]
    async fn operations_after_failure_return_latched_cause() {
        let (mut client, mut server) = open_pair(StreamShape::BidiStreaming);

        client.fail(FailureCause::aborted("caller gave up"));

        assert!(matches!(
            client.send_request(GreetRequest::new("x")),
            Err(CallError::SessionFailed(FailureCause::Aborted { .. }))
        ));
        assert!(matches!(
            server.recv_request().await,
            Err(CallError::SessionFailed(FailureCause::Aborted { .. }))
        ));
        assert!(matches!(
            server.send_response(GreetReply::new("x")),
            Err(CallError::SessionFailed(FailureCause::Aborted { .. }))
        ));
    }

    #[tokio::test]
    async fn deadline_fails_suspended_receive() {
        let (mut client, _server) = CallSession::pair(
            StreamShape::ServerStreaming,
            SessionConfig::with_deadline(Duration::from_millis(50)),
        );

        let result = timeout(Duration::from_secs(1), client.recv_response()).await;
        assert_eq!(result.unwrap(), Err(CallError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn deadline_reaches_both_sides() {
        let (mut client, mut server) = CallSession::pair(
            StreamShape::BidiStreaming,
            SessionConfig::with_deadline(Duration::from_millis(50)),
        );

        assert_eq!(client.terminated().await, CallState::Failed {
            cause: FailureCause::DeadlineExceeded
        });
        assert_eq!(
            server.recv_request().await,
            Err(CallError::DeadlineExceeded)
        );
    }

    #[tokio::test]
    async fn completed_call_ignores_deadline() {
        let (mut client, mut server) = CallSession::pair(
            StreamShape::BidiStreaming,
            SessionConfig::with_deadline(Duration::from_millis(30)),
        );

        client.close_requests();
        server.close_responses();
        assert_eq!(client.state(), CallState::BothClosed);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(client.state(), CallState::BothClosed);
    }

    #[tokio::test]
    async fn buffered_responses_survive_clean_close() {
        let (mut client, mut server) = open_pair(StreamShape::ServerStreaming);

        client.send_request(GreetRequest::new("world")).unwrap();
        server.send_response(GreetReply::new("one")).unwrap();
        server.send_response(GreetReply::new("two")).unwrap();
        server.close_responses();

        assert_eq!(client.recv_response().await.unwrap().unwrap().message, "one");
        assert_eq!(client.recv_response().await.unwrap().unwrap().message, "two");
        assert_eq!(client.recv_response().await.unwrap(), None);
        assert_eq!(client.state(), CallState::BothClosed);
    }

    #[tokio::test]
    async fn lifecycle_events_reach_a_configured_hub() {
        let hub = Arc::new(CallEventHub::with_defaults());
        let mut events = hub.subscribe();

        let config = SessionConfig {
            deadline: None,
            events: Some(Arc::clone(&hub)),
        };
        let (mut client, mut server) = CallSession::pair(StreamShape::ServerStreaming, config);

        client.send_request(GreetRequest::new("world")).unwrap();
        assert_eq!(server.recv_request().await.unwrap().unwrap().name, "world");
        server
            .send_response(GreetReply::new("hello world---0"))
            .unwrap();
        server.close_responses();

        // All emissions above are synchronous, so the hub already holds
        // the full sequence.
        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.call_id, client.id());
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec![
            CallEventKind::Opened,
            CallEventKind::HalfClosed { direction: Direction::ClientToServer },
            CallEventKind::RequestReceived { seq: 0 },
            CallEventKind::ResponseSent { seq: 0 },
            CallEventKind::HalfClosed { direction: Direction::ServerToClient },
            CallEventKind::Completed,
        ]);
    }

    #[tokio::test]
    async fn failure_emits_a_failed_event() {
        let hub = Arc::new(CallEventHub::with_defaults());
        let mut events = hub.subscribe();

        let config = SessionConfig {
            deadline: None,
            events: Some(Arc::clone(&hub)),
        };
        let (mut client, _server) = CallSession::pair(StreamShape::BidiStreaming, config);

        client.fail(FailureCause::transport("socket reset"));

        assert_eq!(events.try_recv().unwrap().kind, CallEventKind::Opened);
        assert_eq!(events.try_recv().unwrap().kind, CallEventKind::Failed {
            cause: FailureCause::transport("socket reset")
        });
    }

    #[tokio::test]
    async fn pair_with_id_preserves_identifier() {
        let id = CallId::new();
        let (client, server) =
            CallSession::pair_with_id(id, StreamShape::BidiStreaming, SessionConfig::default());
        assert_eq!(client.id(), id);
        assert_eq!(server.id(), id);
    }
}
