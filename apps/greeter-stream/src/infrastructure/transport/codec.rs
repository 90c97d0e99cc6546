//! Wire Codec
//!
//! JSON frame format spoken between the WebSocket connector and
//! listener. Every WebSocket text message carries exactly one frame;
//! the `frame` tag selects the variant.
//!
//! # Frame Flow
//!
//! ```text
//!   client                                server
//!     | -- open {call_id, shape} ---------> |
//!     | -- request {payload} -------------> |
//!     | -- close_requests ----------------> |
//!     | <------------- response {payload} -- |
//!     | <------------------ close_responses -- |
//!     | <-- fail {cause} -- (either way) --> |
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::call::{CallId, FailureCause, StreamShape};
use crate::domain::greeting::{GreetRequest, GreetReply};

/// Errors raised while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Frame could not be serialized to JSON.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),

    /// Text could not be parsed as a frame.
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum WireFrame {
    /// First frame of every call, sent by the connector.
    Open {
        /// Identifier shared by both processes for this call.
        call_id: CallId,
        /// Shape the call runs under.
        shape: StreamShape,
    },
    /// One request message, client to server.
    Request {
        /// The request payload.
        payload: GreetRequest,
    },
    /// One response message, server to client.
    Response {
        /// The response payload.
        payload: GreetReply,
    },
    /// The client finished its request stream.
    CloseRequests,
    /// The server finished its response stream.
    CloseResponses,
    /// Either side failed the call; carries the latched cause.
    Fail {
        /// Why the call failed.
        cause: FailureCause,
    },
}

impl WireFrame {
    /// Encode this frame as a JSON text payload.
    ///
    /// # Errors
    ///
    /// [`CodecError::Encode`] if serialization fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Encode)
    }

    /// Decode one frame from a JSON text payload.
    ///
    /// # Errors
    ///
    /// [`CodecError::Decode`] on malformed or unknown frames.
    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        serde_json::from_str(text).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_frame_carries_call_id_and_shape() {
        let call_id = CallId::new();
        let frame = WireFrame::Open {
            call_id,
            shape: StreamShape::ServerStreaming,
        };

        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""frame":"open""#));
        assert!(json.contains(r#""shape":"server_streaming""#));

        assert_eq!(WireFrame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn request_frame_round_trips() {
        let frame = WireFrame::Request {
            payload: GreetRequest::new("world"),
        };
        let json = frame.to_json().unwrap();
        assert_eq!(WireFrame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn close_frames_are_bare_tags() {
        assert_eq!(
            WireFrame::CloseRequests.to_json().unwrap(),
            r#"{"frame":"close_requests"}"#
        );
        assert_eq!(
            WireFrame::CloseResponses.to_json().unwrap(),
            r#"{"frame":"close_responses"}"#
        );
    }

    #[test]
    fn fail_frame_nests_the_cause() {
        let frame = WireFrame::Fail {
            cause: FailureCause::transport("socket reset"),
        };
        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""cause":"transport""#));
        assert_eq!(WireFrame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn unknown_frame_tag_is_a_decode_error() {
        let err = WireFrame::from_json(r#"{"frame":"subscribe"}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(WireFrame::from_json("not json").is_err());
    }
}
