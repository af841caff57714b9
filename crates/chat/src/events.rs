//! Wire decoding for server-sent chat events.
//!
//! Each SSE `data` field carries a JSON envelope
//! `{responseType, content, data?, timestamp, messageId?}`. Decoding turns it
//! into a [`StreamEvent`] whose [`StreamEventKind`] owns a typed payload, so
//! the reducer never inspects raw JSON.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt};

use crate::error::{ChatResult, DecodeEnvelopeSnafu, DecodePayloadSnafu, MissingPayloadSnafu};
use crate::message::{ChannelMessage, SourceRecord};
use crate::timestamp::parse_server_timestamp;

pub const DEFAULT_SERVER_ERROR: &str = "Server Error";

/// `responseType` values understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    LlmResponse,
    AgentStatus,
    AgentThinking,
    ServerError,
    RetrievedData,
    GeneratingChannelMessage,
    ChannelMessage,
    EndOfStream,
}

impl ResponseType {
    pub fn parse(raw: &str) -> Option<Self> {
        let parsed = match raw {
            "LLM_RESPONSE" => Self::LlmResponse,
            "AGENT_STATUS" => Self::AgentStatus,
            "AGENT_THINKING" => Self::AgentThinking,
            "SERVER_ERROR" => Self::ServerError,
            "RETRIEVED_DATA" => Self::RetrievedData,
            "GENERATING_CHANNEL_MESSAGE" => Self::GeneratingChannelMessage,
            "CHANNEL_MESSAGE" => Self::ChannelMessage,
            "END_OF_STREAM" => Self::EndOfStream,
            _ => return None,
        };
        Some(parsed)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LlmResponse => "LLM_RESPONSE",
            Self::AgentStatus => "AGENT_STATUS",
            Self::AgentThinking => "AGENT_THINKING",
            Self::ServerError => "SERVER_ERROR",
            Self::RetrievedData => "RETRIEVED_DATA",
            Self::GeneratingChannelMessage => "GENERATING_CHANNEL_MESSAGE",
            Self::ChannelMessage => "CHANNEL_MESSAGE",
            Self::EndOfStream => "END_OF_STREAM",
        }
    }
}

/// Channel-message payload as announced by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    /// Every channel arrived with its metadata.
    Full(Vec<ChannelMessage>),
    /// Only channel names arrived; metadata must be fetched later.
    Names(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventKind {
    ResponseChunk(String),
    Status(String),
    Thinking(String),
    ServerError(String),
    RetrievedData(Vec<SourceRecord>),
    GeneratingChannelMessage,
    ChannelMessage(ChannelPayload),
    EndOfStream,
    /// A `responseType` this client does not act on.
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub kind: StreamEventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

impl StreamEvent {
    pub fn new(kind: StreamEventKind) -> Self {
        Self {
            kind,
            timestamp: None,
            message_id: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Decodes one SSE `data` field.
    pub fn decode(raw: &str) -> ChatResult<Self> {
        let envelope: WireEnvelope = serde_json::from_str(raw).context(DecodeEnvelopeSnafu {
            stage: "decode-stream-envelope",
        })?;

        let timestamp = envelope
            .timestamp
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .and_then(|raw| match parse_server_timestamp(raw) {
                Ok(parsed) => Some(parsed),
                Err(error) => {
                    // The reducer falls back to the receive time.
                    tracing::warn!(
                        response_type = %envelope.response_type,
                        error = %error,
                        "ignoring unparseable stream event timestamp"
                    );
                    None
                }
            });
        let message_id = envelope
            .message_id
            .filter(|value| !value.trim().is_empty());
        let content = envelope.content.unwrap_or_default();

        let Some(response_type) = ResponseType::parse(&envelope.response_type) else {
            return Ok(Self {
                kind: StreamEventKind::Unrecognized(envelope.response_type),
                timestamp,
                message_id,
            });
        };

        let kind = match response_type {
            ResponseType::LlmResponse => StreamEventKind::ResponseChunk(content),
            ResponseType::AgentStatus => StreamEventKind::Status(content),
            ResponseType::AgentThinking => StreamEventKind::Thinking(content),
            ResponseType::ServerError => {
                let content = if content.trim().is_empty() {
                    DEFAULT_SERVER_ERROR.to_string()
                } else {
                    content
                };
                StreamEventKind::ServerError(content)
            }
            ResponseType::RetrievedData => {
                StreamEventKind::RetrievedData(decode_sources(envelope.data)?)
            }
            ResponseType::GeneratingChannelMessage => StreamEventKind::GeneratingChannelMessage,
            ResponseType::ChannelMessage => {
                StreamEventKind::ChannelMessage(decode_channels(envelope.data)?)
            }
            ResponseType::EndOfStream => StreamEventKind::EndOfStream,
        };

        Ok(Self {
            kind,
            timestamp,
            message_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(alias = "response_type")]
    response_type: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, alias = "message_id")]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SourcesData {
    Wrapped { sources: Vec<SourceRecord> },
    Bare(Vec<SourceRecord>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChannelEntry {
    Name(String),
    Full(ChannelMessage),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ChannelsData {
    Wrapped { channels: Vec<ChannelEntry> },
    Bare(Vec<ChannelEntry>),
}

fn decode_sources(data: Option<Value>) -> ChatResult<Vec<SourceRecord>> {
    let data = data.context(MissingPayloadSnafu {
        stage: "decode-retrieved-data",
        kind: ResponseType::RetrievedData.as_str(),
    })?;
    let decoded: SourcesData = serde_json::from_value(data).context(DecodePayloadSnafu {
        stage: "decode-retrieved-data",
        kind: ResponseType::RetrievedData.as_str(),
    })?;

    Ok(match decoded {
        SourcesData::Wrapped { sources } | SourcesData::Bare(sources) => sources,
    })
}

fn decode_channels(data: Option<Value>) -> ChatResult<ChannelPayload> {
    let data = data.context(MissingPayloadSnafu {
        stage: "decode-channel-message",
        kind: ResponseType::ChannelMessage.as_str(),
    })?;
    let decoded: ChannelsData = serde_json::from_value(data).context(DecodePayloadSnafu {
        stage: "decode-channel-message",
        kind: ResponseType::ChannelMessage.as_str(),
    })?;
    let entries = match decoded {
        ChannelsData::Wrapped { channels } | ChannelsData::Bare(channels) => channels,
    };

    // Any name-only entry means the server is still persisting; the whole set
    // is treated as names and refetched.
    if entries
        .iter()
        .any(|entry| matches!(entry, ChannelEntry::Name(_)))
    {
        let names = entries
            .into_iter()
            .map(|entry| match entry {
                ChannelEntry::Name(name) => name,
                ChannelEntry::Full(message) => message.channel,
            })
            .collect();
        return Ok(ChannelPayload::Names(names));
    }

    Ok(ChannelPayload::Full(
        entries
            .into_iter()
            .filter_map(|entry| match entry {
                ChannelEntry::Full(message) => Some(message),
                ChannelEntry::Name(_) => None,
            })
            .collect(),
    ))
}
