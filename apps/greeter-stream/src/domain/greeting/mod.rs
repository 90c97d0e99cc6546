//! Greeting Payloads
//!
//! The request and reply message types exchanged over a call. Payloads
//! are immutable once sent; the engine never inspects them.

use serde::{Deserialize, Serialize};

/// A greeting request carrying the name to greet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    /// Name to greet.
    pub name: String,
}

impl GreetRequest {
    /// Build a request for the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A greeting reply carrying free-form text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetReply {
    /// Reply text.
    pub message: String,
}

impl GreetReply {
    /// Build a reply with the given text.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serde_round_trip() {
        let request = GreetRequest::new("world");
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"name":"world"}"#);
        let back: GreetRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn reply_serde_round_trip() {
        let reply = GreetReply::new("hello world---0");
        let json = serde_json::to_string(&reply).unwrap();
        assert_eq!(json, r#"{"message":"hello world---0"}"#);
        let back: GreetReply = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reply);
    }
}
