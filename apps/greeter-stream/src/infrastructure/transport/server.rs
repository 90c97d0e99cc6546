//! WebSocket Listener
//!
//! Server side of the transport. [`CallListener`] accepts connections
//! and serves calls on each one sequentially: an `open` frame starts a
//! call, a handler task runs it, and the connection bridge pumps frames
//! between the socket and the session's other half until the call
//! terminates.
//!
//! The bridge drives a local [`ClientCall`], so inbound requests pass
//! the same shape and ordering guards a local caller's would.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::GreeterHandler;
use crate::domain::call::{CallError, CallState, FailureCause};
use crate::infrastructure::events::SharedCallEventHub;
use crate::infrastructure::rpc::serve_call;
use crate::infrastructure::session::{CallSession, ClientCall, SessionConfig};

use super::codec::{CodecError, WireFrame};

// =============================================================================
// Errors
// =============================================================================

/// Errors raised by the listener.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Listener could not bind to the address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: String,
        /// The underlying bind error.
        #[source]
        source: std::io::Error,
    },

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

// =============================================================================
// Call Listener
// =============================================================================

/// WebSocket listener serving greeter calls.
#[derive(Debug)]
pub struct CallListener<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<H>,
    events: Option<SharedCallEventHub>,
    cancel: CancellationToken,
}

impl<H> CallListener<H>
where
    H: GreeterHandler + 'static,
{
    /// Bind the listener and keep the resolved address around, so
    /// callers binding port 0 can learn the port they got.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when the address cannot be bound.
    pub async fn bind(
        addr: &str,
        handler: Arc<H>,
        events: Option<SharedCallEventHub>,
        cancel: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self {
            listener,
            local_addr,
            handler,
            events,
            cancel,
        })
    }

    /// The address the listener actually bound.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept and serve connections until cancelled.
    ///
    /// Failed accepts are logged and skipped; each connection runs on
    /// its own task with a child cancellation token.
    ///
    /// # Errors
    ///
    /// None at present: accept failures are logged and the loop
    /// continues.
    pub async fn serve(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr, "greeter listening");
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("listener shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let handler = Arc::clone(&self.handler);
                        let events = self.events.clone();
                        let cancel = self.cancel.child_token();
                        tokio::spawn(handle_connection(stream, peer, handler, events, cancel));
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                    }
                },
            }
        }
    }
}

// =============================================================================
// Connection Handling
// =============================================================================

/// Serve calls on one connection until it closes or is cancelled.
async fn handle_connection<H>(
    stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<H>,
    events: Option<SharedCallEventHub>,
    cancel: CancellationToken,
) where
    H: GreeterHandler + 'static,
{
    let mut ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            warn!(%peer, error = %err, "websocket handshake failed");
            return;
        }
    };
    debug!(%peer, "connection established");

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => match WireFrame::from_json(&text) {
                    Ok(WireFrame::Open { call_id, shape }) => {
                        debug!(%peer, call_id = %call_id, shape = %shape, "call opened");
                        let config = SessionConfig {
                            deadline: None,
                            events: events.clone(),
                        };
                        let (bridge_half, server_call) =
                            CallSession::pair_with_id(call_id, shape, config);

                        let worker_handler = Arc::clone(&handler);
                        tokio::spawn(async move {
                            serve_call(worker_handler.as_ref(), server_call).await;
                        });

                        if !run_server_bridge(&mut ws, bridge_half, &cancel).await {
                            break;
                        }
                    }
                    Ok(frame) => {
                        warn!(%peer, ?frame, "expected open frame");
                        let cause = FailureCause::protocol("expected open frame");
                        let _ = send_frame(&mut ws, &WireFrame::Fail { cause }).await;
                        break;
                    }
                    Err(err) => {
                        warn!(%peer, error = %err, "malformed frame");
                        let cause = FailureCause::protocol("malformed frame");
                        let _ = send_frame(&mut ws, &WireFrame::Fail { cause }).await;
                        break;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%peer, "connection closed");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%peer, error = %err, "connection error");
                    break;
                }
            },
        }
    }

    let _ = ws.close(None).await;
    debug!(%peer, "connection finished");
}

/// Failure cause for an error raised by applying an inbound frame.
fn ingress_cause(err: CallError) -> FailureCause {
    match err {
        CallError::ClosedChannel => FailureCause::protocol("request after close"),
        other => other.into_cause(),
    }
}

/// Pump frames between the socket and one call's bridge half.
///
/// Returns whether the connection is still usable for another call.
async fn run_server_bridge(
    ws: &mut WebSocketStream<TcpStream>,
    mut half: ClientCall,
    cancel: &CancellationToken,
) -> bool {
    let call_id = half.id();
    let mut state_rx = half.state_watch();
    let mut requests_done = false;
    let mut responses_done = false;
    let mut peer_informed = false;
    let mut alive = true;

    while !(requests_done && responses_done) {
        tokio::select! {
            () = cancel.cancelled() => {
                half.fail(FailureCause::aborted("server shutting down"));
                alive = false;
                break;
            }
            outbound = half.recv_response(), if !responses_done => match outbound {
                Ok(Some(reply)) => {
                    if send_frame(ws, &WireFrame::Response { payload: reply }).await.is_err() {
                        half.fail(FailureCause::transport("connection lost"));
                        peer_informed = true;
                        alive = false;
                        break;
                    }
                }
                Ok(None) => {
                    responses_done = true;
                    if send_frame(ws, &WireFrame::CloseResponses).await.is_err() {
                        half.fail(FailureCause::transport("connection lost"));
                        peer_informed = true;
                        alive = false;
                        break;
                    }
                }
                // Failure is latched; the post-loop handoff informs the peer.
                Err(_) => break,
            },
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => match WireFrame::from_json(&text) {
                    Ok(WireFrame::Request { payload }) => {
                        if let Err(err) = half.send_request(payload) {
                            half.fail(ingress_cause(err));
                            break;
                        }
                    }
                    Ok(WireFrame::CloseRequests) => {
                        half.close_requests();
                        requests_done = true;
                    }
                    Ok(WireFrame::Fail { cause }) => {
                        half.fail(cause);
                        peer_informed = true;
                        break;
                    }
                    Ok(frame) => {
                        warn!(call_id = %call_id, ?frame, "unexpected frame from client");
                        half.fail(FailureCause::protocol("unexpected frame from client"));
                        break;
                    }
                    Err(err) => {
                        warn!(call_id = %call_id, error = %err, "malformed frame from client");
                        half.fail(FailureCause::protocol("malformed frame from client"));
                        break;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(call_id = %call_id, len = data.len(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    half.fail(FailureCause::transport("connection closed mid-call"));
                    peer_informed = true;
                    alive = false;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    half.fail(FailureCause::transport(err.to_string()));
                    peer_informed = true;
                    alive = false;
                    break;
                }
            },
            _ = async { let _ = state_rx.wait_for(CallState::is_failed).await; } => break,
        }
    }

    if !peer_informed {
        if let Some(cause) = half.state().failure() {
            let _ = send_frame(ws, &WireFrame::Fail { cause: cause.clone() }).await;
        }
    }
    debug!(call_id = %call_id, state = %half.state(), "server bridge finished");

    // A failed call can leave frames of the dead call inbound, so the
    // connection is only reusable after a clean completion.
    alive && !half.state().is_failed()
}

async fn send_frame(
    ws: &mut WebSocketStream<TcpStream>,
    frame: &WireFrame,
) -> Result<(), ServerError> {
    let json = frame.to_json()?;
    ws.send(Message::Text(json.into())).await?;
    Ok(())
}
