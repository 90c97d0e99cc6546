//! Message Channels
//!
//! The ordered FIFO conduit under each call direction. A producer pushes
//! typed messages through a [`MessageSender`], a consumer pulls them from
//! the linked [`MessageReceiver`]. Closing is an explicit "no more sends"
//! marker: it never discards messages already enqueued, and it wakes a
//! consumer suspended on an empty channel with end-of-stream.
//!
//! Built on unbounded `tokio::sync::mpsc` channels, so sends never
//! suspend. Closing drops the producer handle, which is exactly what
//! makes a pending `recv()` resolve to `None` once the buffer drains.

use tokio::sync::mpsc;

use crate::domain::call::CallError;

/// Create a linked sender/receiver pair for one direction.
#[must_use]
pub fn message_channel<T>() -> (MessageSender<T>, MessageReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MessageSender { tx: Some(tx) }, MessageReceiver { rx })
}

/// Producing half of one direction's channel.
#[derive(Debug)]
pub struct MessageSender<T> {
    tx: Option<mpsc::UnboundedSender<T>>,
}

impl<T> MessageSender<T> {
    /// Enqueue a message for the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ClosedChannel`] once this half was closed, or
    /// when the consumer is gone and the message can no longer be
    /// delivered.
    pub fn send(&mut self, message: T) -> Result<(), CallError> {
        self.tx
            .as_ref()
            .ok_or(CallError::ClosedChannel)?
            .send(message)
            .map_err(|_| CallError::ClosedChannel)
    }

    /// Mark this direction closed. Idempotent.
    ///
    /// Already-enqueued messages stay deliverable; the consumer observes
    /// end-of-stream after draining them. Returns `true` only for the
    /// call that actually performed the close.
    pub fn close(&mut self) -> bool {
        self.tx.take().is_some()
    }

    /// Whether this half has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Consuming half of one direction's channel.
#[derive(Debug)]
pub struct MessageReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> MessageReceiver<T> {
    /// Pull the next message in FIFO order.
    ///
    /// Suspends while the channel is open and empty. Resolves to `None`
    /// (end-of-stream) once the channel is closed and fully drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;
    use tokio_test::{assert_pending, assert_ready_eq, task};

    use super::*;

    #[tokio::test]
    async fn messages_arrive_in_fifo_order() {
        let (mut tx, mut rx) = message_channel();

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        tx.send(3).unwrap();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn close_preserves_enqueued_messages() {
        let (mut tx, mut rx) = message_channel();

        tx.send("a").unwrap();
        tx.send("b").unwrap();
        assert!(tx.close());

        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let (mut tx, _rx) = message_channel();

        tx.send(1).unwrap();
        tx.close();

        assert_eq!(tx.send(2), Err(CallError::ClosedChannel));
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (mut tx, mut rx) = message_channel::<u32>();

        assert!(tx.close());
        assert!(!tx.close());
        assert!(!tx.close());

        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn recv_after_end_of_stream_stays_ended() {
        let (mut tx, mut rx) = message_channel::<u32>();
        tx.close();

        assert_eq!(rx.recv().await, None);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn close_unblocks_pending_recv() {
        let (mut tx, mut rx) = message_channel::<u32>();

        let pending = tokio::spawn(async move { rx.recv().await });

        // Give the receiver a chance to suspend on the empty channel.
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.close();

        let result = timeout(Duration::from_secs(1), pending).await;
        assert_eq!(result.unwrap().unwrap(), None);
    }

    #[test]
    fn recv_stays_pending_until_a_send_arrives() {
        let (mut tx, mut rx) = message_channel();
        let mut recv = task::spawn(async move { rx.recv().await });

        assert_pending!(recv.poll());

        tx.send(7).unwrap();
        assert!(recv.is_woken());
        assert_ready_eq!(recv.poll(), Some(7));
    }

    #[tokio::test]
    async fn send_unblocks_pending_recv() {
        let (mut tx, mut rx) = message_channel();

        let pending = tokio::spawn(async move { rx.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(42).unwrap();

        let result = timeout(Duration::from_secs(1), pending).await;
        assert_eq!(result.unwrap().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn send_to_dropped_consumer_is_rejected() {
        let (mut tx, rx) = message_channel();
        drop(rx);

        assert_eq!(tx.send(1), Err(CallError::ClosedChannel));
    }
}
