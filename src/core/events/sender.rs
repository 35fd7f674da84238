//! Outbound event channel.

use tokio::sync::mpsc;
use tracing::debug;

use super::{ErrorDetail, ServerEvent, ServerPayload};

/// Clonable handle through which every task belonging to a session emits
/// events. All sends funnel into the single per-connection writer task,
/// which keeps frames from interleaving on the wire. Sending after the
/// connection has closed is a silent no-op.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ServerEvent>,
}

impl EventSender {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self { tx }
    }

    pub async fn send(&self, payload: ServerPayload) {
        if self.tx.send(ServerEvent::new(payload)).await.is_err() {
            debug!("dropping event for closed connection");
        }
    }

    pub async fn send_error(&self, error: ErrorDetail) {
        self.send(ServerPayload::Error { error }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_close_is_noop() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        drop(rx);

        // Must not panic or hang.
        sender.send(ServerPayload::AudioCleared).await;
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        sender.send(ServerPayload::AudioCleared).await;
        sender
            .send(ServerPayload::ItemDeleted {
                item_id: "item_1".to_string(),
            })
            .await;

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first.payload, ServerPayload::AudioCleared));
        assert!(matches!(second.payload, ServerPayload::ItemDeleted { .. }));
    }
}
