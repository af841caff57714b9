//! Coordinates the reducer, the backend and background tasks.
//!
//! All state mutation happens on the task that owns the controller. Stream
//! readers and pollers only post [`ControllerEvent`]s into its inbox, tagged
//! with the generation they belong to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use amai_chat::{
    Applied, ChannelPollRequest, ChatState, DataSource, IntegrationRegistry, PollApplied,
    RetentionPolicy, SessionGeneration, StreamEvent, SubmitTicket, ToggleAction,
};
use amai_client::{ChatBackend, ChatEventStream, ChatStreamHandle, HttpBackend, TransportEvent};
use chrono::Utc;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{
    AppResult, BackendSnafu, BusySnafu, CreateDownloadDirSnafu, RejectedSnafu,
    WriteDownloadSnafu,
};
use crate::poller::{PollConfig, PollOutcome, poll_channel_messages};

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub retention: RetentionPolicy,
    pub poll: PollConfig,
    pub download_dir: PathBuf,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            retention: RetentionPolicy::default(),
            poll: PollConfig::default(),
            download_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug)]
pub enum ControllerEvent {
    Transport {
        generation: SessionGeneration,
        event: TransportEvent,
    },
    /// The reader drained its stream; the worker is gone.
    StreamClosed { generation: SessionGeneration },
    PollFinished {
        request: ChannelPollRequest,
        outcome: PollOutcome,
    },
}

/// What a handled event changed, for the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Applied(Applied),
    TransportFailed { reason: String },
    ChannelMessagesResolved(PollApplied),
    ChannelMessagesUnavailable(PollOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub integrations: Option<usize>,
    pub history: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub action: ToggleAction,
    pub error: Option<String>,
}

struct StreamTasks {
    generation: SessionGeneration,
    worker: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Drop for StreamTasks {
    fn drop(&mut self) {
        // Aborting the reader drops the event stream, which cancels the worker.
        self.reader.abort();
        self.worker.abort();
    }
}

pub struct ChatController {
    backend: Arc<dyn ChatBackend>,
    state: ChatState,
    integrations: IntegrationRegistry,
    poll: PollConfig,
    download_dir: PathBuf,
    generation_tx: watch::Sender<SessionGeneration>,
    inbox_tx: mpsc::UnboundedSender<ControllerEvent>,
    inbox_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    stream_tasks: Option<StreamTasks>,
    poll_tasks: Vec<JoinHandle<()>>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ChatBackend>, options: ControllerOptions) -> Self {
        let (generation_tx, _) = watch::channel(SessionGeneration::default());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            state: ChatState::new(options.retention),
            integrations: IntegrationRegistry::new(),
            poll: options.poll,
            download_dir: options.download_dir,
            generation_tx,
            inbox_tx,
            inbox_rx,
            stream_tasks: None,
            poll_tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn integrations(&self) -> &IntegrationRegistry {
        &self.integrations
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn subscribe_generation(&self) -> watch::Receiver<SessionGeneration> {
        self.generation_tx.subscribe()
    }

    /// Swaps the backend, e.g. after the host changed.
    pub fn set_backend(&mut self, backend: Arc<dyn ChatBackend>) -> AppResult<()> {
        ensure!(
            !self.state.is_streaming(),
            BusySnafu {
                stage: "set-backend",
                action: "change the backend",
            }
        );
        self.backend = backend;
        Ok(())
    }

    /// Loads integrations and history concurrently. Failures are logged.
    pub async fn load(&mut self) -> LoadSummary {
        let (integrations, history) = futures::future::join(
            self.backend.list_integrations(),
            self.backend.chat_history(),
        )
        .await;

        let integrations = match integrations {
            Ok(integrations) => {
                self.integrations.replace_all(integrations);
                Some(self.integrations.len())
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to load integrations");
                None
            }
        };
        let history = match history {
            Ok(messages) => {
                self.state.history_mut().replace_all(messages);
                Some(self.state.history().len())
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to load chat history");
                None
            }
        };

        LoadSummary {
            integrations,
            history,
        }
    }

    /// Starts a stream for `text`.
    pub fn submit(&mut self, text: &str) -> AppResult<SubmitTicket> {
        let ticket = self
            .state
            .submit(text, Utc::now())
            .map_err(|reason| {
                RejectedSnafu {
                    stage: "submit",
                    reason,
                }
                .build()
            })?;
        self.generation_tx.send_replace(ticket.generation);

        let handle = match self.backend.open_chat_stream(&ticket.message) {
            Ok(handle) => handle,
            Err(source) => {
                self.state.fail_transport(ticket.generation);
                return Err(source).context(BackendSnafu {
                    stage: "open-chat-stream",
                });
            }
        };
        self.spawn_stream_pipeline(ticket.generation, handle);

        tracing::info!(generation = %ticket.generation, "message submitted");
        Ok(ticket)
    }

    fn spawn_stream_pipeline(&mut self, generation: SessionGeneration, handle: ChatStreamHandle) {
        let worker = tokio::spawn(handle.worker);
        let reader = tokio::spawn(Self::forward_stream(
            generation,
            handle.stream,
            self.inbox_tx.clone(),
        ));
        self.stream_tasks = Some(StreamTasks {
            generation,
            worker,
            reader,
        });
    }

    async fn forward_stream(
        generation: SessionGeneration,
        mut stream: ChatEventStream,
        inbox_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) {
        while let Some(event) = stream.recv().await {
            if inbox_tx
                .send(ControllerEvent::Transport { generation, event })
                .is_err()
            {
                return;
            }
        }
        let _ = inbox_tx.send(ControllerEvent::StreamClosed { generation });
    }

    fn close_stream(&mut self, generation: SessionGeneration) {
        if self
            .stream_tasks
            .as_ref()
            .is_some_and(|tasks| tasks.generation == generation)
        {
            self.stream_tasks = None;
        }
    }

    /// Waits for the next background event.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.inbox_rx.recv().await
    }

    /// Applies one background event. `None` means nothing visible changed.
    pub fn handle(&mut self, event: ControllerEvent) -> Option<Update> {
        match event {
            ControllerEvent::Transport {
                generation,
                event: TransportEvent::Message(data),
            } => self.handle_stream_data(generation, &data),
            ControllerEvent::Transport {
                generation,
                event: TransportEvent::Failed(reason),
            } => self.handle_transport_failure(generation, reason),
            ControllerEvent::StreamClosed { generation } => {
                self.handle_transport_failure(generation, "chat stream ended".to_string())
            }
            ControllerEvent::PollFinished { request, outcome } => {
                self.poll_tasks.retain(|task| !task.is_finished());
                match outcome {
                    PollOutcome::Found(record) => Some(Update::ChannelMessagesResolved(
                        self.state.apply_polled_channel_messages(&request, record),
                    )),
                    other => {
                        tracing::warn!(
                            generation = %request.generation,
                            outcome = ?other,
                            "channel messages were not resolved"
                        );
                        Some(Update::ChannelMessagesUnavailable(other))
                    }
                }
            }
        }
    }

    fn handle_stream_data(&mut self, generation: SessionGeneration, data: &str) -> Option<Update> {
        let event = match StreamEvent::decode(data) {
            Ok(event) => event,
            Err(error) => {
                tracing::warn!(%generation, error = %error, "ignoring malformed stream event");
                return None;
            }
        };

        let applied = self.state.apply(generation, event, Utc::now());
        match &applied {
            Applied::Ignored(reason) => {
                tracing::debug!(%generation, reason = ?reason, "stream event ignored");
                return None;
            }
            Applied::Finished(_) => self.close_stream(generation),
            Applied::PollChannelMessages(request) => self.spawn_poller(request.clone()),
            _ => {}
        }
        Some(Update::Applied(applied))
    }

    fn handle_transport_failure(
        &mut self,
        generation: SessionGeneration,
        reason: String,
    ) -> Option<Update> {
        if !self.state.fail_transport(generation) {
            return None;
        }
        self.close_stream(generation);
        tracing::warn!(%generation, reason = %reason, "chat stream failed");
        Some(Update::TransportFailed { reason })
    }

    fn spawn_poller(&mut self, request: ChannelPollRequest) {
        let backend = self.backend.clone();
        let config = self.poll;
        let generation_rx = self.generation_tx.subscribe();
        let inbox_tx = self.inbox_tx.clone();

        let task = tokio::spawn(async move {
            let outcome = poll_channel_messages(backend, &request, config, generation_rx).await;
            let _ = inbox_tx.send(ControllerEvent::PollFinished { request, outcome });
        });
        self.poll_tasks.push(task);
    }

    /// Connects or disconnects `source`. `None` while a call is pending.
    pub async fn toggle_integration(&mut self, source: DataSource) -> Option<ToggleOutcome> {
        let action = self.integrations.begin_toggle(source)?;
        let error = match action {
            ToggleAction::Connect(source) => {
                let result = self.backend.save_integration(source).await;
                let error = result.as_ref().err().map(ToString::to_string);
                self.integrations.finish_connect(source, result);
                error
            }
            ToggleAction::Disconnect(source) => {
                let result = self.backend.remove_integration(source).await;
                let error = result.as_ref().err().map(ToString::to_string);
                self.integrations.finish_disconnect(source, result);
                error
            }
        };
        Some(ToggleOutcome { action, error })
    }

    /// Clears the server history, then the local copy.
    pub async fn clear_history(&mut self) -> AppResult<()> {
        self.backend
            .clear_chat_history()
            .await
            .context(BackendSnafu {
                stage: "clear-chat-history",
            })?;
        self.state.clear_history();
        Ok(())
    }

    /// Saves one channel's generated messages into the download directory.
    pub async fn download(&self, chat_id: &str, channel: &str) -> AppResult<PathBuf> {
        let blob = self
            .backend
            .download_channel_messages(chat_id, channel)
            .await
            .context(BackendSnafu {
                stage: "download-channel-messages",
            })?;

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .context(CreateDownloadDirSnafu {
                stage: "create-download-directory",
                path: self.download_dir.clone(),
            })?;

        let path = self.download_dir.join(download_file_name(chat_id, channel));
        tokio::fs::write(&path, blob)
            .await
            .context(WriteDownloadSnafu {
                stage: "write-download",
                path: path.clone(),
            })?;

        tracing::info!(chat_id, channel, path = ?path, "channel messages downloaded");
        Ok(path)
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        for task in &self.poll_tasks {
            task.abort();
        }
    }
}

/// Builds the HTTP backend for `host`, normalizing trailing slashes.
pub fn connect_backend(host: &str) -> AppResult<HttpBackend> {
    HttpBackend::new(host).context(BackendSnafu {
        stage: "connect-backend",
    })
}

pub fn download_file_name(chat_id: &str, channel: &str) -> String {
    let sanitize = |part: &str| {
        part.chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                other => other,
            })
            .collect::<String>()
    };
    format!("{}-{}.json", sanitize(chat_id), sanitize(channel))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use amai_chat::{ChatMessage, Integration, StreamOutcome};
    use amai_client::{BoxFuture, ClientError, ClientResult, make_event_stream};
    use serde_json::{Value, json};

    use super::*;

    /// In-memory backend whose chat streams replay a fixed script.
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<Vec<TransportEvent>>,
        history: Mutex<VecDeque<Vec<ChatMessage>>>,
        integrations: Mutex<Vec<Integration>>,
        fail_calls: bool,
        opened: Mutex<Vec<String>>,
        history_calls: Mutex<u32>,
    }

    impl ScriptedBackend {
        fn with_stream(frames: Vec<Value>) -> Self {
            Self {
                script: Mutex::new(
                    frames
                        .into_iter()
                        .map(|frame| TransportEvent::Message(frame.to_string()))
                        .collect(),
                ),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail_calls: true,
                ..Self::default()
            }
        }

        fn error(&self) -> ClientError {
            ClientError::Status {
                stage: "scripted",
                status: 500,
                body: "boom".to_string(),
            }
        }
    }

    impl ChatBackend for ScriptedBackend {
        fn list_integrations(&self) -> BoxFuture<'_, ClientResult<Vec<Integration>>> {
            Box::pin(async move {
                if self.fail_calls {
                    return Err(self.error());
                }
                Ok(self.integrations.lock().unwrap().clone())
            })
        }

        fn save_integration(&self, source: DataSource) -> BoxFuture<'_, ClientResult<Integration>> {
            Box::pin(async move {
                if self.fail_calls {
                    return Err(self.error());
                }
                Ok(Integration {
                    id: format!("int-{source}"),
                    data_source: source,
                    created_at: Utc::now(),
                })
            })
        }

        fn remove_integration(&self, _source: DataSource) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async move {
                if self.fail_calls {
                    return Err(self.error());
                }
                Ok(())
            })
        }

        fn chat_history(&self) -> BoxFuture<'_, ClientResult<Vec<ChatMessage>>> {
            Box::pin(async move {
                *self.history_calls.lock().unwrap() += 1;
                if self.fail_calls {
                    return Err(self.error());
                }
                let mut history = self.history.lock().unwrap();
                let snapshot = if history.len() > 1 {
                    history.pop_front()
                } else {
                    history.front().cloned()
                };
                Ok(snapshot.unwrap_or_default())
            })
        }

        fn clear_chat_history(&self) -> BoxFuture<'_, ClientResult<()>> {
            Box::pin(async move {
                if self.fail_calls {
                    return Err(self.error());
                }
                Ok(())
            })
        }

        fn download_channel_messages<'a>(
            &'a self,
            chat_id: &'a str,
            channel: &'a str,
        ) -> BoxFuture<'a, ClientResult<Vec<u8>>> {
            Box::pin(async move {
                if self.fail_calls {
                    return Err(self.error());
                }
                Ok(format!("{{\"chat\":\"{chat_id}\",\"channel\":\"{channel}\"}}").into_bytes())
            })
        }

        fn open_chat_stream(&self, message: &str) -> ClientResult<ChatStreamHandle> {
            if self.fail_calls {
                return Err(self.error());
            }
            self.opened.lock().unwrap().push(message.to_string());

            let script = self.script.lock().unwrap().clone();
            let (event_tx, stream, cancel_rx) = make_event_stream();
            let worker = Box::pin(async move {
                for event in script {
                    if event_tx.send(event).is_err() {
                        return;
                    }
                }
                // Stay connected until the client closes the stream.
                let _ = cancel_rx.await;
            });
            Ok(ChatStreamHandle { stream, worker })
        }
    }

    fn frame(response_type: &str, content: &str) -> Value {
        json!({
            "responseType": response_type,
            "content": content,
            "timestamp": "2025-03-01T10:00:00.000000"
        })
    }

    fn controller(backend: ScriptedBackend) -> (ChatController, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let options = ControllerOptions {
            poll: PollConfig {
                attempts: 3,
                delay: Duration::ZERO,
            },
            ..ControllerOptions::default()
        };
        (ChatController::new(backend.clone(), options), backend)
    }

    /// Handles events until the stream finishes or fails.
    async fn drive(controller: &mut ChatController) -> Vec<Update> {
        let mut updates = Vec::new();
        while let Some(event) = controller.next_event().await {
            let Some(update) = controller.handle(event) else {
                continue;
            };
            let done = matches!(
                update,
                Update::Applied(Applied::Finished(_)) | Update::TransportFailed { .. }
            );
            updates.push(update);
            if done {
                break;
            }
        }
        updates
    }

    #[tokio::test]
    async fn streamed_chunks_become_a_history_entry() {
        let (mut controller, backend) = controller(ScriptedBackend::with_stream(vec![
            frame("AGENT_STATUS", "Analyzing"),
            frame("LLM_RESPONSE", "Hi"),
            frame("LLM_RESPONSE", " there"),
            json!({"responseType": "END_OF_STREAM", "content": "Stream completed", "timestamp": null}),
        ]));

        let ticket = controller.submit("hello").unwrap();
        assert_eq!(*controller.subscribe_generation().borrow(), ticket.generation);

        let updates = drive(&mut controller).await;

        assert!(matches!(
            updates.last(),
            Some(Update::Applied(Applied::Finished(StreamOutcome::Completed(_))))
        ));
        assert_eq!(
            controller.state().history().latest().unwrap().response,
            "Hi there"
        );
        assert!(!controller.state().is_streaming());
        assert!(controller.stream_tasks.is_none());
        assert_eq!(backend.opened.lock().unwrap().as_slice(), ["hello"]);
    }

    #[tokio::test]
    async fn second_submission_while_streaming_is_rejected() {
        let (mut controller, backend) = controller(ScriptedBackend::with_stream(vec![frame(
            "LLM_RESPONSE",
            "partial",
        )]));

        controller.submit("first").unwrap();
        assert!(controller.submit("second").is_err());
        assert_eq!(backend.opened.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_events_are_skipped() {
        let (mut controller, _) = controller(ScriptedBackend {
            script: Mutex::new(vec![
                TransportEvent::Message("{ nope".to_string()),
                TransportEvent::Message(frame("LLM_RESPONSE", "ok").to_string()),
                TransportEvent::Message(frame("END_OF_STREAM", "").to_string()),
            ]),
            ..ScriptedBackend::default()
        });

        controller.submit("x").unwrap();
        drive(&mut controller).await;

        assert_eq!(controller.state().history().latest().unwrap().response, "ok");
    }

    #[tokio::test]
    async fn transport_failure_discards_the_session() {
        let (mut controller, _) = controller(ScriptedBackend {
            script: Mutex::new(vec![
                TransportEvent::Message(frame("LLM_RESPONSE", "partial").to_string()),
                TransportEvent::Failed("connection reset".to_string()),
            ]),
            ..ScriptedBackend::default()
        });

        controller.submit("x").unwrap();
        let updates = drive(&mut controller).await;

        assert_eq!(
            updates.last(),
            Some(&Update::TransportFailed {
                reason: "connection reset".to_string()
            })
        );
        assert!(controller.state().history().is_empty());
        assert!(controller.state().retained_error().is_none());
        assert!(controller.submit("retry").is_ok());
    }

    #[tokio::test]
    async fn open_failure_releases_the_session() {
        let (mut controller, _) = controller(ScriptedBackend::failing());

        assert!(controller.submit("x").is_err());
        assert!(!controller.state().is_streaming());
    }

    #[tokio::test]
    async fn channel_placeholders_are_resolved_by_polling() {
        let populated = ChatMessage {
            id: "srv-1".to_string(),
            message: "campaign".to_string(),
            response: "Done".to_string(),
            sources: None,
            channel_messages: Some(vec![
                amai_chat::ChannelMessage {
                    channel: "email".to_string(),
                    metadata: vec![json!({"subject": "Come back"})],
                    total: 12,
                },
                amai_chat::ChannelMessage {
                    channel: "sms".to_string(),
                    metadata: vec![json!({"body": "Hi"})],
                    total: 3,
                },
            ]),
            created_at: Utc::now(),
        };
        let backend = ScriptedBackend::with_stream(vec![
            frame("LLM_RESPONSE", "Done"),
            json!({"responseType": "CHANNEL_MESSAGE", "data": {"channels": ["email", "sms"]}}),
            frame("END_OF_STREAM", ""),
        ]);
        backend.history.lock().unwrap().push_back(vec![populated]);
        let (mut controller, _) = controller(backend);

        controller.submit("campaign").unwrap();

        let mut finished = false;
        let mut resolved = None;
        while !(finished && resolved.is_some()) {
            let event = controller.next_event().await.unwrap();
            match controller.handle(event) {
                Some(Update::Applied(Applied::Finished(_))) => finished = true,
                Some(Update::ChannelMessagesResolved(applied)) => resolved = Some(applied),
                _ => {}
            }
        }

        // The poll may land before or after the stream ends.
        assert!(matches!(
            resolved,
            Some(PollApplied::History | PollApplied::ActiveSession)
        ));
        let entry = controller.state().history().latest().unwrap();
        assert!(entry.has_populated_channel_messages());
        assert_eq!(entry.channel_messages.as_ref().unwrap()[0].total, 12);
        assert_eq!(controller.state().history().len(), 1);
    }

    #[tokio::test]
    async fn late_poll_results_do_not_touch_a_newer_session() {
        let backend = ScriptedBackend::with_stream(vec![
            frame("LLM_RESPONSE", "Done"),
            json!({"responseType": "CHANNEL_MESSAGE", "data": {"channels": ["email"]}}),
        ]);
        let (mut controller, _) = controller(backend);
        let generation = controller.submit("campaign").unwrap().generation;

        let mut request = None;
        while request.is_none() {
            let event = controller.next_event().await.unwrap();
            if let Some(Update::Applied(Applied::PollChannelMessages(polled))) =
                controller.handle(event)
            {
                request = Some(polled);
            }
        }

        controller.handle(ControllerEvent::Transport {
            generation,
            event: TransportEvent::Failed("dropped".to_string()),
        });
        controller.submit("next").unwrap();

        let stale = ControllerEvent::PollFinished {
            request: request.unwrap(),
            outcome: PollOutcome::Found(ChatMessage {
                id: "srv-1".to_string(),
                message: "campaign".to_string(),
                response: "Done".to_string(),
                sources: None,
                channel_messages: None,
                created_at: Utc::now(),
            }),
        };
        assert_eq!(
            controller.handle(stale),
            Some(Update::ChannelMessagesResolved(PollApplied::Stale))
        );
        assert!(controller.state().session().unwrap().channel_messages().is_none());
    }

    #[tokio::test]
    async fn load_fills_registry_and_history() {
        let backend = ScriptedBackend::default();
        backend.integrations.lock().unwrap().push(Integration {
            id: "i1".to_string(),
            data_source: DataSource::Website,
            created_at: Utc::now(),
        });
        let (mut controller, _) = controller(backend);

        let summary = controller.load().await;

        assert_eq!(summary.integrations, Some(1));
        assert_eq!(summary.history, Some(0));
        assert!(controller.integrations().is_connected(DataSource::Website));
    }

    #[tokio::test]
    async fn load_failures_are_reported_not_fatal() {
        let (mut controller, _) = controller(ScriptedBackend::failing());

        let summary = controller.load().await;

        assert_eq!(
            summary,
            LoadSummary {
                integrations: None,
                history: None
            }
        );
    }

    #[tokio::test]
    async fn toggling_connects_then_disconnects() {
        let (mut controller, _) = controller(ScriptedBackend::default());

        let outcome = controller
            .toggle_integration(DataSource::Shopify)
            .await
            .unwrap();
        assert_eq!(outcome.action, ToggleAction::Connect(DataSource::Shopify));
        assert!(outcome.error.is_none());
        assert!(controller.integrations().is_connected(DataSource::Shopify));

        let outcome = controller
            .toggle_integration(DataSource::Shopify)
            .await
            .unwrap();
        assert_eq!(outcome.action, ToggleAction::Disconnect(DataSource::Shopify));
        assert!(controller.integrations().is_empty());
    }

    #[tokio::test]
    async fn failed_toggle_keeps_the_set() {
        let (mut controller, _) = controller(ScriptedBackend::failing());

        let outcome = controller
            .toggle_integration(DataSource::Crms)
            .await
            .unwrap();

        assert!(outcome.error.is_some());
        assert!(controller.integrations().is_empty());
        assert!(!controller.integrations().is_busy(DataSource::Crms));
    }

    #[tokio::test]
    async fn clear_history_only_clears_after_the_server_agrees() {
        let (mut controller, _) = controller(ScriptedBackend::failing());
        controller.state.history_mut().push(ChatMessage {
            id: "m1".to_string(),
            message: "hi".to_string(),
            response: "hello".to_string(),
            sources: None,
            channel_messages: None,
            created_at: Utc::now(),
        });

        assert!(controller.clear_history().await.is_err());
        assert_eq!(controller.state().history().len(), 1);
    }

    #[tokio::test]
    async fn downloads_land_in_the_download_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ScriptedBackend::default());
        let controller = ChatController::new(
            backend,
            ControllerOptions {
                download_dir: dir.path().join("exports"),
                ..ControllerOptions::default()
            },
        );

        let path = controller.download("chat-9", "email").await.unwrap();

        assert_eq!(path, dir.path().join("exports").join("chat-9-email.json"));
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("chat-9"));
    }

    #[test]
    fn connect_backend_rejects_hosts_without_scheme() {
        let backend = connect_backend("http://localhost:8001/").unwrap();
        assert_eq!(backend.host(), "http://localhost:8001");

        assert!(matches!(
            connect_backend("localhost:8001"),
            Err(crate::error::AppError::Backend {
                stage: "connect-backend",
                ..
            })
        ));
    }

    #[test]
    fn download_names_cannot_escape_the_directory() {
        assert_eq!(download_file_name("../etc", "a/b"), ".._etc-a_b.json");
    }
}
