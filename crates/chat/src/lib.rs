#![deny(unsafe_code)]

pub mod channel;
pub mod error;
pub mod events;
pub mod history;
pub mod ids;
pub mod integrations;
pub mod message;
pub mod session;
pub mod timestamp;

pub use channel::Channel;
pub use error::{ChatError, ChatResult};
pub use events::{ChannelPayload, DEFAULT_SERVER_ERROR, ResponseType, StreamEvent, StreamEventKind};
pub use history::ChatHistory;
pub use ids::{SessionGeneration, local_message_id};
pub use integrations::{IntegrationRegistry, ToggleAction};
pub use message::{
    ChannelMessage, ChatHistoryResponse, ChatMessage, DataSource, Integration, SourceRecord,
    StatusEvent, StatusKind,
};
pub use session::{
    Applied, ChannelPollRequest, ChatState, IgnoreReason, PollApplied, RetainedError,
    RetentionPolicy, StreamOutcome, StreamSession, SubmitRejected, SubmitTicket,
};
pub use timestamp::parse_server_timestamp;
