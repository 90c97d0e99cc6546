//! RPC Layer
//!
//! Client and server driving of call endpoints, independent of how the
//! two ends are linked. [`serve_call`] runs a handler over a server
//! endpoint and owns the implicit close-on-return; [`GreeterClient`]
//! wraps a [`CallOpener`](crate::application::ports::CallOpener) in the
//! per-shape exchange patterns; [`LoopbackChannel`] links both ends
//! in-process, which is also what the integration tests ride on.

pub mod client;
pub mod server;

pub use client::{GreeterClient, ReplyStream};
pub use server::{LoopbackChannel, serve_call};
