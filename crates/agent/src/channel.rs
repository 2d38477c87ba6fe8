//! Outbound message channel.
//!
//! Every reply and every transfer event leaves the agent through a
//! [`MessageChannel`]. The production implementation is a bounded tokio mpsc
//! sender drained by the transport's writer task, so concurrent emitters need
//! no extra synchronization and a slow controller applies backpressure to
//! in-flight exports.

use std::future::Future;

use protocol::{Envelope, Message, TransferEvent};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur while emitting.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The receiving side has gone away.
    #[error("message channel closed")]
    Closed,
}

/// Sink for outbound envelopes, safe to use from many tasks at once.
pub trait MessageChannel: Clone + Send + Sync + 'static {
    /// Queue an envelope for delivery.
    fn send(&self, envelope: Envelope) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Push a transfer event, with an optional binary payload alongside it.
    fn emit(
        &self,
        event: TransferEvent,
        payload: Option<Vec<u8>>,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send {
        let mut envelope = Envelope::push(Message::Transfer(event));
        envelope.attachment = payload;
        self.send(envelope)
    }
}

/// Sending half of the agent's outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::Sender<Envelope>,
}

/// Create an outbound queue holding up to `capacity` envelopes.
pub fn outbound(capacity: usize) -> (ChannelSender, mpsc::Receiver<Envelope>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSender { tx }, rx)
}

impl MessageChannel for ChannelSender {
    fn send(&self, envelope: Envelope) -> impl Future<Output = Result<(), ChannelError>> + Send {
        let tx = self.tx.clone();
        async move { tx.send(envelope).await.map_err(|_| ChannelError::Closed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::TransferEventKind;

    #[tokio::test]
    async fn test_emit_attaches_payload() {
        let (sender, mut rx) = outbound(4);

        sender
            .emit(TransferEvent::data("s-1"), Some(vec![1, 2, 3]))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.sequence, protocol::PUSH_SEQUENCE);
        assert_eq!(envelope.attachment, Some(vec![1, 2, 3]));
        match envelope.payload {
            Message::Transfer(event) => {
                assert_eq!(event.event, TransferEventKind::Data);
                assert_eq!(event.session, "s-1");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (sender, rx) = outbound(1);
        drop(rx);

        let result = sender.emit(TransferEvent::end("s-1"), None).await;
        assert_eq!(result, Err(ChannelError::Closed));
    }
}
