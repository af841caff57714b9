use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::channel::Channel;
use crate::error::{ChatError, ChatResult};
use crate::timestamp::serde_utc;

/// External data source a user can connect.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Website,
    Shopify,
    Crms,
}

impl DataSource {
    pub const ALL: [DataSource; 3] = [Self::Website, Self::Shopify, Self::Crms];

    /// Wire name, also used as the path segment for disconnects.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "WEBSITE",
            Self::Shopify => "SHOPIFY",
            Self::Crms => "CRMS",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Self::Website => "Website",
            Self::Shopify => "Shopify",
            Self::Crms => "CRMs",
        }
    }

    pub fn parse(raw: &str) -> ChatResult<Self> {
        let trimmed = raw.trim();
        Self::ALL
            .into_iter()
            .find(|source| source.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ChatError::UnknownDataSource {
                stage: "parse-data-source",
                raw: raw.to_string(),
            })
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = ChatError;

    fn from_str(raw: &str) -> ChatResult<Self> {
        Self::parse(raw)
    }
}

/// One connected external data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: String,
    pub data_source: DataSource,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
}

/// Retrieved customer/data entity, passed through from the server untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRecord(pub Map<String, Value>);

impl SourceRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns a string field, or `None` when absent or not a string.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn display_name(&self) -> String {
        let first = self.text("first_name").unwrap_or_default();
        let last = self.text("last_name").unwrap_or_default();
        format!("{first} {last}").trim().to_string()
    }

    pub fn email(&self) -> Option<&str> {
        self.text("email")
    }

    pub fn phone(&self) -> Option<&str> {
        self.text("phone")
    }

    pub fn data_source(&self) -> Option<&str> {
        self.text("data_source")
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Generated outbound message summary for one marketing channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub channel: String,
    #[serde(default)]
    pub metadata: Vec<Value>,
    #[serde(default)]
    pub total: u64,
}

impl ChannelMessage {
    /// Zero-count entry shown until the real metadata has been fetched.
    pub fn placeholder(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            metadata: Vec::new(),
            total: 0,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.metadata.is_empty() && self.total == 0
    }

    pub fn kind(&self) -> Channel {
        Channel::parse(&self.channel)
    }
}

/// Finalized chat exchange. Only built once a stream completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub message: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_messages: Option<Vec<ChannelMessage>>,
    #[serde(with = "serde_utc")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// True once every channel entry carries real data.
    pub fn has_populated_channel_messages(&self) -> bool {
        self.channel_messages
            .as_ref()
            .is_some_and(|messages| {
                !messages.is_empty() && messages.iter().all(|message| !message.is_placeholder())
            })
    }
}

/// Body of `GET /api/chat/history`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatHistoryResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Status,
    Thinking,
    Error,
}

/// Transient progress line shown while a stream is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub id: String,
    pub kind: StatusKind,
    pub content: String,
    #[serde(with = "serde_utc")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_ms: Option<i64>,
}

impl StatusEvent {
    pub fn is_error(&self) -> bool {
        self.kind == StatusKind::Error
    }
}
