//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the greeter service behavior and the port
//! interfaces that connect the call engine to its transports.

/// Port interfaces for opening and serving calls.
pub mod ports;

/// Application services implementing the greeter behavior per shape.
pub mod services;
