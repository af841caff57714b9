//! Resolves channel-message placeholders from the history endpoint.
//!
//! The server only announces channel names while it is still persisting the
//! generated messages. The poller re-reads the history a fixed number of
//! times and gives up early once a newer session has started.

use std::sync::Arc;
use std::time::Duration;

use amai_chat::{ChannelPollRequest, ChatHistory, ChatMessage, SessionGeneration};
use amai_client::ChatBackend;
use tokio::sync::watch;

use crate::settings::{DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_DELAY_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_POLL_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Found(ChatMessage),
    Exhausted { attempts: u32 },
    Superseded { current: SessionGeneration },
    /// The controller went away.
    Cancelled,
}

pub async fn poll_channel_messages(
    backend: Arc<dyn ChatBackend>,
    request: &ChannelPollRequest,
    config: PollConfig,
    mut generation_rx: watch::Receiver<SessionGeneration>,
) -> PollOutcome {
    for attempt in 1..=config.attempts {
        let sleep = tokio::time::sleep(config.delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                changed = generation_rx.changed() => {
                    if changed.is_err() {
                        return PollOutcome::Cancelled;
                    }
                }
            }
            let current = *generation_rx.borrow_and_update();
            if current != request.generation {
                return PollOutcome::Superseded { current };
            }
        }

        let current = *generation_rx.borrow();
        if current != request.generation {
            return PollOutcome::Superseded { current };
        }

        match backend.chat_history().await {
            Ok(messages) => {
                let history = ChatHistory::from_messages(messages);
                if let Some(entry) = find_exchange(&history, request)
                    && entry.has_populated_channel_messages()
                {
                    tracing::debug!(
                        generation = %request.generation,
                        chat_id = %entry.id,
                        attempt,
                        "channel messages resolved"
                    );
                    return PollOutcome::Found(entry.clone());
                }
                tracing::debug!(generation = %request.generation, attempt, "channel messages not ready");
            }
            Err(error) => {
                tracing::warn!(
                    generation = %request.generation,
                    attempt,
                    error = %error,
                    "failed to fetch history while polling channel messages"
                );
            }
        }
    }

    PollOutcome::Exhausted {
        attempts: config.attempts,
    }
}

/// Server id first, then the newest exchange with the same user text.
fn find_exchange<'a>(
    history: &'a ChatHistory,
    request: &ChannelPollRequest,
) -> Option<&'a ChatMessage> {
    request
        .server_message_id
        .as_deref()
        .and_then(|id| history.get(id))
        .or_else(|| history.latest_with_message(&request.sent_message))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use amai_chat::{ChannelMessage, DataSource, Integration};
    use amai_client::{BoxFuture, ChatStreamHandle, ClientError, ClientResult};
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    /// Serves queued history snapshots, repeating the last one.
    struct HistorySequence {
        snapshots: Mutex<VecDeque<Vec<ChatMessage>>>,
        calls: Mutex<u32>,
    }

    impl HistorySequence {
        fn new(snapshots: Vec<Vec<ChatMessage>>) -> Arc<Self> {
            Arc::new(Self {
                snapshots: Mutex::new(snapshots.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    impl ChatBackend for HistorySequence {
        fn list_integrations(&self) -> BoxFuture<'_, ClientResult<Vec<Integration>>> {
            Box::pin(async { Ok(Vec::new()) })
        }

        fn save_integration(&self, _source: DataSource) -> BoxFuture<'_, ClientResult<Integration>> {
            unimplemented!()
        }

        fn remove_integration(&self, _source: DataSource) -> BoxFuture<'_, ClientResult<()>> {
            unimplemented!()
        }

        fn chat_history(&self) -> BoxFuture<'_, ClientResult<Vec<ChatMessage>>> {
            *self.calls.lock().unwrap() += 1;
            let mut snapshots = self.snapshots.lock().unwrap();
            let snapshot = if snapshots.len() > 1 {
                snapshots.pop_front()
            } else {
                snapshots.front().cloned()
            };
            Box::pin(async move {
                snapshot.ok_or(ClientError::Status {
                    stage: "test-history",
                    status: 500,
                    body: "empty".to_string(),
                })
            })
        }

        fn clear_chat_history(&self) -> BoxFuture<'_, ClientResult<()>> {
            unimplemented!()
        }

        fn download_channel_messages<'a>(
            &'a self,
            _chat_id: &'a str,
            _channel: &'a str,
        ) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
            unimplemented!()
        }

        fn open_chat_stream(&self, _message: &str) -> ClientResult<ChatStreamHandle> {
            unimplemented!()
        }
    }

    fn request(server_id: Option<&str>) -> ChannelPollRequest {
        ChannelPollRequest {
            generation: SessionGeneration::new(1),
            local_id: "local-1".to_string(),
            server_message_id: server_id.map(str::to_string),
            sent_message: "campaign".to_string(),
            channels: vec!["email".to_string()],
        }
    }

    fn exchange(id: &str, message: &str, total: u64) -> ChatMessage {
        let channel = if total == 0 {
            ChannelMessage::placeholder("email")
        } else {
            ChannelMessage {
                channel: "email".to_string(),
                metadata: vec![json!({"to": "a@b.c"})],
                total,
            }
        };
        ChatMessage {
            id: id.to_string(),
            message: message.to_string(),
            response: "done".to_string(),
            sources: None,
            channel_messages: Some(vec![channel]),
            created_at: Utc::now(),
        }
    }

    fn fast() -> PollConfig {
        PollConfig {
            attempts: 3,
            delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn keeps_polling_until_metadata_arrives() {
        let backend = HistorySequence::new(vec![
            vec![exchange("srv-1", "campaign", 0)],
            vec![exchange("srv-1", "campaign", 4)],
        ]);
        let (_tx, rx) = watch::channel(SessionGeneration::new(1));

        let outcome = poll_channel_messages(backend.clone(), &request(None), fast(), rx).await;

        let PollOutcome::Found(entry) = outcome else {
            panic!("expected a resolved exchange, got {outcome:?}");
        };
        assert_eq!(entry.channel_messages.unwrap()[0].total, 4);
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn server_id_beats_matching_text() {
        let backend = HistorySequence::new(vec![vec![
            exchange("srv-1", "campaign", 1),
            exchange("srv-2", "campaign", 7),
        ]]);
        let (_tx, rx) = watch::channel(SessionGeneration::new(1));

        let outcome = poll_channel_messages(backend, &request(Some("srv-1")), fast(), rx).await;

        let PollOutcome::Found(entry) = outcome else {
            panic!("expected a resolved exchange");
        };
        assert_eq!(entry.id, "srv-1");
    }

    #[tokio::test]
    async fn gives_up_after_the_configured_attempts() {
        let backend = HistorySequence::new(vec![vec![exchange("srv-1", "other", 3)]]);
        let (_tx, rx) = watch::channel(SessionGeneration::new(1));

        let outcome = poll_channel_messages(backend.clone(), &request(None), fast(), rx).await;

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 3 });
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn fetch_errors_count_as_attempts() {
        let backend = HistorySequence::new(Vec::new());
        let (_tx, rx) = watch::channel(SessionGeneration::new(1));

        let outcome = poll_channel_messages(backend.clone(), &request(None), fast(), rx).await;

        assert_eq!(outcome, PollOutcome::Exhausted { attempts: 3 });
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn stops_when_a_newer_session_starts() {
        let backend = HistorySequence::new(vec![vec![exchange("srv-1", "campaign", 0)]]);
        let (tx, rx) = watch::channel(SessionGeneration::new(1));
        tx.send_replace(SessionGeneration::new(2));

        let outcome = poll_channel_messages(backend.clone(), &request(None), fast(), rx).await;

        assert_eq!(
            outcome,
            PollOutcome::Superseded {
                current: SessionGeneration::new(2)
            }
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn generation_change_interrupts_the_wait() {
        let backend = HistorySequence::new(vec![vec![exchange("srv-1", "campaign", 0)]]);
        let (tx, rx) = watch::channel(SessionGeneration::new(1));
        let config = PollConfig {
            attempts: 5,
            delay: Duration::from_secs(3600),
        };

        let poll = tokio::spawn({
            let backend = backend.clone();
            async move { poll_channel_messages(backend, &request(None), config, rx).await }
        });
        tokio::task::yield_now().await;
        tx.send_replace(SessionGeneration::new(2));

        let outcome = poll.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Superseded { .. }));
        assert_eq!(backend.calls(), 0);
    }
}
