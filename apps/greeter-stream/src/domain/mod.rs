//! Domain Layer - Call lifecycle rules and payload types.
//!
//! This layer contains the core types for streaming calls with no
//! dependency on the async runtime. All types here are pure Rust with
//! serialization support.

/// Call shapes, directions, the call state machine and error taxonomy.
pub mod call;

/// Greeting request/reply payloads.
pub mod greeting;
