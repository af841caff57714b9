//! Stream session reducer.
//!
//! [`ChatState`] owns the history plus at most one active [`StreamSession`].
//! Every transition is a synchronous method call; the caller owns the
//! transport and feeds decoded events in arrival order, tagged with the
//! generation returned by [`ChatState::submit`].

use std::fmt;

use chrono::{DateTime, Utc};

use crate::events::{ChannelPayload, StreamEvent, StreamEventKind};
use crate::history::ChatHistory;
use crate::ids::{SessionGeneration, local_message_id};
use crate::message::{ChannelMessage, ChatMessage, SourceRecord, StatusEvent, StatusKind};

/// What happens to the status list when a stream ends with an error and no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Keep the error banner visible after the stream ends.
    pub retain_on_empty_error: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_on_empty_error: true,
        }
    }
}

/// Transient state of one in-flight request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    generation: SessionGeneration,
    local_id: String,
    sent_message: String,
    submitted_at: DateTime<Utc>,
    response: String,
    statuses: Vec<StatusEvent>,
    has_error: bool,
    sources: Vec<SourceRecord>,
    channel_messages: Option<Vec<ChannelMessage>>,
    generating_channel_messages: bool,
    server_message_id: Option<String>,
}

impl StreamSession {
    fn new(generation: SessionGeneration, sent_message: String, submitted_at: DateTime<Utc>) -> Self {
        Self {
            generation,
            local_id: local_message_id(),
            sent_message,
            submitted_at,
            response: String::new(),
            statuses: Vec::new(),
            has_error: false,
            sources: Vec::new(),
            channel_messages: None,
            generating_channel_messages: false,
            server_message_id: None,
        }
    }

    pub fn generation(&self) -> SessionGeneration {
        self.generation
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn sent_message(&self) -> &str {
        &self.sent_message
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn statuses(&self) -> &[StatusEvent] {
        &self.statuses
    }

    pub fn has_error(&self) -> bool {
        self.has_error
    }

    pub fn sources(&self) -> &[SourceRecord] {
        &self.sources
    }

    pub fn channel_messages(&self) -> Option<&[ChannelMessage]> {
        self.channel_messages.as_deref()
    }

    pub fn is_generating_channel_messages(&self) -> bool {
        self.generating_channel_messages
    }

    pub fn server_message_id(&self) -> Option<&str> {
        self.server_message_id.as_deref()
    }

    /// Id the finalized message will carry.
    pub fn message_id(&self) -> &str {
        self.server_message_id.as_deref().unwrap_or(&self.local_id)
    }

    fn push_status(
        &mut self,
        kind: StatusKind,
        content: String,
        timestamp: DateTime<Utc>,
    ) -> StatusEvent {
        // Durations measure server-side inter-event latency, not local polling.
        let previous = self
            .statuses
            .last()
            .map(|status| status.timestamp)
            .unwrap_or(self.submitted_at);
        let id = match kind {
            StatusKind::Error if !self.has_error => format!("{}-error", self.local_id),
            StatusKind::Error => format!("{}-error-{}", self.local_id, self.statuses.len()),
            StatusKind::Status | StatusKind::Thinking => {
                format!("{}-{}", self.local_id, self.statuses.len())
            }
        };
        let status = StatusEvent {
            id,
            kind,
            content,
            timestamp,
            time_taken_ms: Some((timestamp - previous).num_milliseconds()),
        };
        self.statuses.push(status.clone());
        status
    }
}

/// Error banner kept on screen after a stream ended with an error and no text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetainedError {
    pub sent_message: String,
    pub statuses: Vec<StatusEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitTicket {
    pub generation: SessionGeneration,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitRejected {
    Empty,
    AlreadyStreaming { active: SessionGeneration },
}

impl fmt::Display for SubmitRejected {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => formatter.write_str("message is empty"),
            Self::AlreadyStreaming { active } => {
                write!(formatter, "session {active} is still streaming")
            }
        }
    }
}

/// Request to resolve channel-message placeholders from the history endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPollRequest {
    pub generation: SessionGeneration,
    pub local_id: String,
    pub server_message_id: Option<String>,
    pub sent_message: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Completed(ChatMessage),
    /// No text and no error; nothing to keep.
    Empty,
    ErrorRetained(RetainedError),
    /// Error without text while the retention policy is off.
    ErrorDiscarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NoActiveSession,
    StaleGeneration {
        active: SessionGeneration,
        received: SessionGeneration,
    },
    Unrecognized,
}

/// Observable effect of one reducer step.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Ignored(IgnoreReason),
    /// Content dropped because an error already occurred in this session.
    Suppressed,
    ResponseChunk(String),
    Status(StatusEvent),
    ServerError(StatusEvent),
    SourcesReplaced(usize),
    GeneratingChannelMessages,
    ChannelMessages(Vec<ChannelMessage>),
    /// Placeholders were stored; the caller should start polling.
    PollChannelMessages(ChannelPollRequest),
    Finished(StreamOutcome),
}

/// Result of applying polled channel messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollApplied {
    ActiveSession,
    History,
    Stale,
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct ChatState {
    policy: RetentionPolicy,
    history: ChatHistory,
    session: Option<StreamSession>,
    retained: Option<RetainedError>,
    generation: SessionGeneration,
}

impl ChatState {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut ChatHistory {
        &mut self.history
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    pub fn retained_error(&self) -> Option<&RetainedError> {
        self.retained.as_ref()
    }

    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    /// Latest generation handed out; poll results for older ones are stale.
    pub fn current_generation(&self) -> SessionGeneration {
        self.generation
    }

    /// Starts a session for `text`, resetting all transient state.
    pub fn submit(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmitTicket, SubmitRejected> {
        if let Some(active) = &self.session {
            return Err(SubmitRejected::AlreadyStreaming {
                active: active.generation,
            });
        }
        if text.trim().is_empty() {
            return Err(SubmitRejected::Empty);
        }

        self.generation = self.generation.next();
        self.retained = None;
        self.session = Some(StreamSession::new(self.generation, text.to_string(), now));
        tracing::debug!(generation = %self.generation, "stream session started");

        Ok(SubmitTicket {
            generation: self.generation,
            message: text.to_string(),
        })
    }

    /// Applies one decoded event for `generation`.
    pub fn apply(
        &mut self,
        generation: SessionGeneration,
        event: StreamEvent,
        received_at: DateTime<Utc>,
    ) -> Applied {
        let policy = self.policy;
        let Some(session) = self.session.as_mut() else {
            return Applied::Ignored(IgnoreReason::NoActiveSession);
        };
        if session.generation != generation {
            return Applied::Ignored(IgnoreReason::StaleGeneration {
                active: session.generation,
                received: generation,
            });
        }

        if let Some(message_id) = event.message_id {
            session.server_message_id = Some(message_id);
        }
        let timestamp = event.timestamp.unwrap_or(received_at);

        match event.kind {
            StreamEventKind::ResponseChunk(chunk) => {
                if session.has_error {
                    return Applied::Suppressed;
                }
                session.response.push_str(&chunk);
                Applied::ResponseChunk(chunk)
            }
            StreamEventKind::Status(content) => {
                if session.has_error {
                    return Applied::Suppressed;
                }
                Applied::Status(session.push_status(StatusKind::Status, content, timestamp))
            }
            StreamEventKind::Thinking(content) => {
                if session.has_error {
                    return Applied::Suppressed;
                }
                Applied::Status(session.push_status(StatusKind::Thinking, content, timestamp))
            }
            StreamEventKind::ServerError(content) => {
                let status = session.push_status(StatusKind::Error, content, timestamp);
                session.has_error = true;
                Applied::ServerError(status)
            }
            StreamEventKind::RetrievedData(sources) => {
                let count = sources.len();
                session.sources = sources;
                Applied::SourcesReplaced(count)
            }
            StreamEventKind::GeneratingChannelMessage => {
                session.generating_channel_messages = true;
                Applied::GeneratingChannelMessages
            }
            StreamEventKind::ChannelMessage(ChannelPayload::Full(messages)) => {
                session.generating_channel_messages = false;
                session.channel_messages = Some(messages.clone());
                Applied::ChannelMessages(messages)
            }
            StreamEventKind::ChannelMessage(ChannelPayload::Names(channels)) => {
                session.generating_channel_messages = false;
                session.channel_messages = Some(
                    channels
                        .iter()
                        .map(|channel| ChannelMessage::placeholder(channel.as_str()))
                        .collect(),
                );
                Applied::PollChannelMessages(ChannelPollRequest {
                    generation,
                    local_id: session.local_id.clone(),
                    server_message_id: session.server_message_id.clone(),
                    sent_message: session.sent_message.clone(),
                    channels,
                })
            }
            StreamEventKind::EndOfStream => {
                let outcome = self.finish(policy, received_at);
                Applied::Finished(outcome)
            }
            StreamEventKind::Unrecognized(kind) => {
                tracing::debug!(%generation, response_type = %kind, "ignoring unrecognized stream event");
                Applied::Ignored(IgnoreReason::Unrecognized)
            }
        }
    }

    fn finish(&mut self, policy: RetentionPolicy, finished_at: DateTime<Utc>) -> StreamOutcome {
        let Some(session) = self.session.take() else {
            return StreamOutcome::Empty;
        };
        let message_id = session.message_id().to_string();

        if !session.response.is_empty() {
            let message = ChatMessage {
                id: message_id,
                message: session.sent_message,
                response: session.response,
                sources: (!session.sources.is_empty()).then_some(session.sources),
                channel_messages: session.channel_messages,
                created_at: finished_at,
            };
            self.history.push(message.clone());
            tracing::debug!(generation = %session.generation, id = %message.id, "stream completed");
            return StreamOutcome::Completed(message);
        }

        if !session.has_error {
            return StreamOutcome::Empty;
        }

        if policy.retain_on_empty_error {
            let retained = RetainedError {
                sent_message: session.sent_message,
                statuses: session.statuses,
            };
            self.retained = Some(retained.clone());
            StreamOutcome::ErrorRetained(retained)
        } else {
            StreamOutcome::ErrorDiscarded
        }
    }

    /// Drops the session after a transport failure, keeping nothing.
    ///
    /// Returns false when `generation` is not the active session.
    pub fn fail_transport(&mut self, generation: SessionGeneration) -> bool {
        match &self.session {
            Some(session) if session.generation == generation => {
                self.session = None;
                self.retained = None;
                true
            }
            _ => false,
        }
    }

    /// Replaces placeholders with the server's persisted copy of the exchange.
    pub fn apply_polled_channel_messages(
        &mut self,
        request: &ChannelPollRequest,
        record: ChatMessage,
    ) -> PollApplied {
        if request.generation != self.generation {
            return PollApplied::Stale;
        }

        if let Some(session) = self.session.as_mut()
            && session.generation == request.generation
        {
            session.channel_messages = record.channel_messages;
            if session.server_message_id.is_none() {
                session.server_message_id = Some(record.id);
            }
            return PollApplied::ActiveSession;
        }

        let candidates = [
            Some(record.id.clone()),
            request.server_message_id.clone(),
            Some(request.local_id.clone()),
        ];
        for id in candidates.into_iter().flatten() {
            if self.history.get(&id).is_some() {
                self.history.supersede(&id, record);
                return PollApplied::History;
            }
        }

        PollApplied::NotFound
    }

    /// Empties the history and drops any retained error banner.
    pub fn clear_history(&mut self) {
        self.history.clear();
        self.retained = None;
    }
}
