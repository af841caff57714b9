use std::future::Future;
use std::pin::Pin;

use amai_chat::{ChatMessage, DataSource, Integration};
use tokio::sync::{mpsc, oneshot};

use crate::error::ClientResult;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type StreamWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Raw transport output; payload decoding happens in the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The `data` field of one server-sent event.
    Message(String),
    /// The connection failed or ended. No further events follow.
    Failed(String),
}

/// Receiving half of a chat stream. Dropping it stops the worker.
pub struct ChatEventStream {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// A stream half plus the worker future that feeds it.
///
/// The worker does nothing until it is spawned or polled.
pub struct ChatStreamHandle {
    pub stream: ChatEventStream,
    pub worker: StreamWorker,
}

impl ChatEventStream {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }
}

impl Drop for ChatEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Remote marketing-assistant backend.
pub trait ChatBackend: Send + Sync {
    fn list_integrations(&self) -> BoxFuture<'_, ClientResult<Vec<Integration>>>;
    fn save_integration(&self, source: DataSource) -> BoxFuture<'_, ClientResult<Integration>>;
    fn remove_integration(&self, source: DataSource) -> BoxFuture<'_, ClientResult<()>>;
    fn chat_history(&self) -> BoxFuture<'_, ClientResult<Vec<ChatMessage>>>;
    fn clear_chat_history(&self) -> BoxFuture<'_, ClientResult<()>>;
    /// Raw export of the generated messages for one channel of one exchange.
    fn download_channel_messages<'a>(
        &'a self,
        chat_id: &'a str,
        channel: &'a str,
    ) -> BoxFuture<'a, ClientResult<Vec<u8>>>;
    fn open_chat_stream(&self, message: &str) -> ClientResult<ChatStreamHandle>;
}

/// Creates a connected stream half, its sender and the worker's cancel signal.
pub fn make_event_stream() -> (
    mpsc::UnboundedSender<TransportEvent>,
    ChatEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let stream = ChatEventStream {
        events: event_rx,
        cancel_tx: Some(cancel_tx),
    };
    (event_tx, stream, cancel_rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (event_tx, mut stream, _cancel_rx) = make_event_stream();

        event_tx
            .send(TransportEvent::Message("a".to_string()))
            .unwrap();
        event_tx
            .send(TransportEvent::Failed("gone".to_string()))
            .unwrap();
        drop(event_tx);

        assert_eq!(
            stream.recv().await,
            Some(TransportEvent::Message("a".to_string()))
        );
        assert_eq!(
            stream.recv().await,
            Some(TransportEvent::Failed("gone".to_string()))
        );
        assert_eq!(stream.recv().await, None);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_worker() {
        let (_event_tx, stream, cancel_rx) = make_event_stream();
        drop(stream);
        assert!(cancel_rx.await.is_ok());
    }
}
