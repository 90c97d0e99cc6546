//! Call Lifecycle Rules
//!
//! The state machine every streaming call moves through, independent of
//! shape: OPEN, half-closed per direction, BOTH_CLOSED, or FAILED with a
//! latched cause. Transitions are pure functions on [`CallState`]; the
//! concurrent realization lives in the session module, which serializes
//! them through a single writer.
//!
//! Also home to the error taxonomy ([`CallError`]), the wire-crossing
//! failure causes ([`FailureCause`]) and the lifecycle events published
//! to observers ([`CallEvent`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Identifiers and Tags
// =============================================================================

/// Unique identifier for one call, shared by both ends and every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// Generate a fresh random call id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which of the two directions, if any, carries more than one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamShape {
    /// One request, many responses.
    ServerStreaming,
    /// Many requests, one final response after the client half-closes.
    ClientStreaming,
    /// Many messages both ways, independently paced.
    BidiStreaming,
}

impl StreamShape {
    /// Short name used in logs and frames.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ServerStreaming => "server_streaming",
            Self::ClientStreaming => "client_streaming",
            Self::BidiStreaming => "bidi_streaming",
        }
    }
}

impl fmt::Display for StreamShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the two message directions of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Requests: client towards server.
    ClientToServer,
    /// Responses: server towards client.
    ServerToClient,
}

impl Direction {
    /// Short name used in logs and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClientToServer => "client_to_server",
            Self::ServerToClient => "server_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Failure Causes
// =============================================================================

/// Why a call latched FAILED. Serializable so the cause can be forwarded
/// to the peer in a Fail frame and both sides latch the same reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// The externally imposed call deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// A shape-specific ordering rule was broken.
    #[error("protocol violation: {detail}")]
    Protocol {
        /// Which rule was broken.
        detail: String,
    },
    /// The transport carrying the call failed.
    #[error("transport error: {detail}")]
    Transport {
        /// Opaque transport diagnostic.
        detail: String,
    },
    /// The application aborted the call.
    #[error("call aborted: {detail}")]
    Aborted {
        /// Why the application gave up.
        detail: String,
    },
}

impl FailureCause {
    /// Protocol-violation cause from any displayable detail.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol {
            detail: detail.into(),
        }
    }

    /// Transport cause from any displayable detail.
    pub fn transport(detail: impl Into<String>) -> Self {
        Self::Transport {
            detail: detail.into(),
        }
    }

    /// Application-abort cause from any displayable detail.
    pub fn aborted(detail: impl Into<String>) -> Self {
        Self::Aborted {
            detail: detail.into(),
        }
    }
}

// =============================================================================
// Error Taxonomy
// =============================================================================

/// Every way a call operation can fail. All variants are fatal to the
/// call; nothing is retried inside the engine. Retry means opening a
/// brand-new session and is application policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// Send attempted on a direction that was already closed.
    #[error("send on closed channel")]
    ClosedChannel,
    /// A shape-specific ordering rule was broken by the caller.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// Operation attempted after the session latched FAILED.
    #[error("session failed: {0}")]
    SessionFailed(FailureCause),
    /// The externally imposed call deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
    /// Opaque failure from the transport collaborator.
    #[error("transport error: {0}")]
    Transport(String),
}

impl CallError {
    /// Surface a latched failure cause as the matching operation error.
    ///
    /// Deadline and transport causes surface as themselves so callers can
    /// tell them apart; everything else is reported as a failed session.
    #[must_use]
    pub fn from_cause(cause: FailureCause) -> Self {
        match cause {
            FailureCause::DeadlineExceeded => Self::DeadlineExceeded,
            FailureCause::Transport { detail } => Self::Transport(detail),
            other => Self::SessionFailed(other),
        }
    }

    /// The cause to latch when this error itself fails the session.
    #[must_use]
    pub fn into_cause(self) -> FailureCause {
        match self {
            Self::DeadlineExceeded => FailureCause::DeadlineExceeded,
            Self::ProtocolViolation(detail) => FailureCause::Protocol { detail },
            Self::Transport(detail) => FailureCause::Transport { detail },
            Self::SessionFailed(cause) => cause,
            Self::ClosedChannel => FailureCause::protocol("send on closed channel"),
        }
    }
}

// =============================================================================
// Call State Machine
// =============================================================================

/// Terminal-state machine shared by both ends of a call.
///
/// Monotonic: once `BothClosed` or `Failed` is reached no further
/// transition is permitted; late closes and late failures are no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CallState {
    /// Both directions open.
    Open,
    /// Client announced no more requests; responses may still flow.
    ClientHalfClosed,
    /// Server announced no more responses; requests may still flow.
    ServerHalfClosed,
    /// Both directions closed cleanly.
    BothClosed,
    /// The call failed; the first cause wins and is latched.
    Failed {
        /// Why the call failed.
        cause: FailureCause,
    },
}

impl CallState {
    /// State after one direction announces it will send no more messages.
    ///
    /// Closing an already-closed direction, or closing after the call is
    /// terminal, changes nothing.
    #[must_use]
    pub fn after_close(self, direction: Direction) -> Self {
        match (self, direction) {
            (Self::Open, Direction::ClientToServer) => Self::ClientHalfClosed,
            (Self::Open, Direction::ServerToClient) => Self::ServerHalfClosed,
            (Self::ClientHalfClosed, Direction::ServerToClient)
            | (Self::ServerHalfClosed, Direction::ClientToServer) => Self::BothClosed,
            (state, _) => state,
        }
    }

    /// State after a failure is reported. No-op once terminal, so the
    /// first cause wins and a completed call can never turn failed.
    #[must_use]
    pub fn after_failure(self, cause: FailureCause) -> Self {
        if self.is_terminal() {
            self
        } else {
            Self::Failed { cause }
        }
    }

    /// Whether no further transitions are permitted.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::BothClosed | Self::Failed { .. })
    }

    /// Whether the call latched FAILED.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// The latched failure cause, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&FailureCause> {
        match self {
            Self::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    /// Whether the given direction has been cleanly closed.
    #[must_use]
    pub const fn direction_closed(&self, direction: Direction) -> bool {
        match direction {
            Direction::ClientToServer => {
                matches!(self, Self::ClientHalfClosed | Self::BothClosed)
            }
            Direction::ServerToClient => {
                matches!(self, Self::ServerHalfClosed | Self::BothClosed)
            }
        }
    }

    /// Short name used in logs and events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::ClientHalfClosed => "client_half_closed",
            Self::ServerHalfClosed => "server_half_closed",
            Self::BothClosed => "both_closed",
            Self::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Lifecycle Events
// =============================================================================

/// What happened inside a call, for observers only. Events never gate
/// protocol correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallEventKind {
    /// A session was created.
    Opened,
    /// The server end received a request.
    RequestReceived {
        /// Zero-based position within the request stream.
        seq: u64,
    },
    /// The server end sent a response.
    ResponseSent {
        /// Zero-based position within the response stream.
        seq: u64,
    },
    /// One direction announced no more messages.
    HalfClosed {
        /// Which direction closed.
        direction: Direction,
    },
    /// The call reached `BothClosed`.
    Completed,
    /// The call latched FAILED.
    Failed {
        /// Why the call failed.
        cause: FailureCause,
    },
}

/// One lifecycle event with its call and wall-clock context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEvent {
    /// The call the event belongs to.
    pub call_id: CallId,
    /// The call's shape.
    pub shape: StreamShape,
    /// What happened.
    pub kind: CallEventKind,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl CallEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(call_id: CallId, shape: StreamShape, kind: CallEventKind) -> Self {
        Self {
            call_id,
            shape,
            kind,
            at: Utc::now(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case(CallState::Open, Direction::ClientToServer => CallState::ClientHalfClosed)]
    #[test_case(CallState::Open, Direction::ServerToClient => CallState::ServerHalfClosed)]
    #[test_case(CallState::ClientHalfClosed, Direction::ServerToClient => CallState::BothClosed)]
    #[test_case(CallState::ServerHalfClosed, Direction::ClientToServer => CallState::BothClosed)]
    #[test_case(CallState::ClientHalfClosed, Direction::ClientToServer => CallState::ClientHalfClosed)]
    #[test_case(CallState::ServerHalfClosed, Direction::ServerToClient => CallState::ServerHalfClosed)]
    #[test_case(CallState::BothClosed, Direction::ClientToServer => CallState::BothClosed)]
    #[test_case(CallState::BothClosed, Direction::ServerToClient => CallState::BothClosed)]
    fn close_transitions(state: CallState, direction: Direction) -> CallState {
        state.after_close(direction)
    }

    #[test]
    fn close_after_failure_is_noop() {
        let failed = CallState::Open.after_failure(FailureCause::DeadlineExceeded);
        assert_eq!(
            failed.clone().after_close(Direction::ClientToServer),
            failed
        );
        assert_eq!(
            failed.clone().after_close(Direction::ServerToClient),
            failed
        );
    }

    #[test]
    fn first_failure_cause_wins() {
        let failed = CallState::ClientHalfClosed.after_failure(FailureCause::DeadlineExceeded);
        let still_failed = failed.after_failure(FailureCause::transport("socket reset"));
        assert_eq!(
            still_failed.failure(),
            Some(&FailureCause::DeadlineExceeded)
        );
    }

    #[test]
    fn completed_call_never_turns_failed() {
        let closed = CallState::BothClosed.after_failure(FailureCause::DeadlineExceeded);
        assert_eq!(closed, CallState::BothClosed);
        assert!(!closed.is_failed());
    }

    #[test_case(CallState::Open => false)]
    #[test_case(CallState::ClientHalfClosed => false)]
    #[test_case(CallState::ServerHalfClosed => false)]
    #[test_case(CallState::BothClosed => true)]
    fn terminal_states(state: CallState) -> bool {
        state.is_terminal()
    }

    #[test]
    fn failed_is_terminal() {
        let failed = CallState::Open.after_failure(FailureCause::protocol("early reply"));
        assert!(failed.is_terminal());
        assert!(failed.is_failed());
    }

    #[test]
    fn direction_closed_tracks_half_closes() {
        let state = CallState::Open;
        assert!(!state.direction_closed(Direction::ClientToServer));
        assert!(!state.direction_closed(Direction::ServerToClient));

        let state = state.after_close(Direction::ClientToServer);
        assert!(state.direction_closed(Direction::ClientToServer));
        assert!(!state.direction_closed(Direction::ServerToClient));

        let state = state.after_close(Direction::ServerToClient);
        assert!(state.direction_closed(Direction::ClientToServer));
        assert!(state.direction_closed(Direction::ServerToClient));
        assert_eq!(state, CallState::BothClosed);
    }

    #[test]
    fn error_from_cause_mapping() {
        assert_eq!(
            CallError::from_cause(FailureCause::DeadlineExceeded),
            CallError::DeadlineExceeded
        );
        assert_eq!(
            CallError::from_cause(FailureCause::transport("gone")),
            CallError::Transport("gone".to_string())
        );
        assert_eq!(
            CallError::from_cause(FailureCause::protocol("early reply")),
            CallError::SessionFailed(FailureCause::protocol("early reply"))
        );
    }

    #[test]
    fn error_into_cause_round_trip() {
        assert_eq!(
            CallError::DeadlineExceeded.into_cause(),
            FailureCause::DeadlineExceeded
        );
        assert_eq!(
            CallError::ProtocolViolation("extra request".to_string()).into_cause(),
            FailureCause::protocol("extra request")
        );
        assert_eq!(
            CallError::Transport("reset".to_string()).into_cause(),
            FailureCause::transport("reset")
        );
    }

    #[test]
    fn failure_cause_serde_round_trip() {
        let causes = [
            FailureCause::DeadlineExceeded,
            FailureCause::protocol("early reply"),
            FailureCause::transport("socket reset"),
            FailureCause::aborted("handler gave up"),
        ];
        for cause in causes {
            let json = serde_json::to_string(&cause).unwrap();
            let back: FailureCause = serde_json::from_str(&json).unwrap();
            assert_eq!(back, cause);
        }
    }

    #[test]
    fn shape_serde_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&StreamShape::ServerStreaming).unwrap(),
            "\"server_streaming\""
        );
        assert_eq!(
            serde_json::from_str::<StreamShape>("\"bidi_streaming\"").unwrap(),
            StreamShape::BidiStreaming
        );
    }

    #[test]
    fn call_ids_are_unique() {
        let a = CallId::new();
        let b = CallId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn event_carries_timestamp() {
        let before = Utc::now();
        let event = CallEvent::now(
            CallId::new(),
            StreamShape::BidiStreaming,
            CallEventKind::Completed,
        );
        assert!(event.at >= before);
        assert!(event.at <= Utc::now());
    }

    // Random operation sequences against the monotonicity invariant: once a
    // state is terminal, no later close or failure may change it.
    #[derive(Debug, Clone)]
    enum Op {
        Close(Direction),
        Fail(FailureCause),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Close(Direction::ClientToServer)),
            Just(Op::Close(Direction::ServerToClient)),
            Just(Op::Fail(FailureCause::DeadlineExceeded)),
            Just(Op::Fail(FailureCause::protocol("p"))),
            Just(Op::Fail(FailureCause::transport("t"))),
        ]
    }

    proptest! {
        #[test]
        fn state_is_monotonic(ops in proptest::collection::vec(op_strategy(), 1..32)) {
            let mut state = CallState::Open;
            let mut terminal: Option<CallState> = None;

            for op in ops {
                state = match op {
                    Op::Close(direction) => state.after_close(direction),
                    Op::Fail(cause) => state.after_failure(cause),
                };

                if let Some(latched) = &terminal {
                    prop_assert_eq!(latched, &state);
                } else if state.is_terminal() {
                    terminal = Some(state.clone());
                }
            }
        }

        #[test]
        fn both_closes_always_reach_both_closed(first_client in proptest::bool::ANY) {
            let mut state = CallState::Open;
            let (a, b) = if first_client {
                (Direction::ClientToServer, Direction::ServerToClient)
            } else {
                (Direction::ServerToClient, Direction::ClientToServer)
            };
            state = state.after_close(a);
            state = state.after_close(b);
            prop_assert_eq!(state, CallState::BothClosed);
        }
    }
}
