#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod http;
pub mod sse;

pub use backend::{
    BoxFuture, ChatBackend, ChatEventStream, ChatStreamHandle, StreamWorker, TransportEvent,
    make_event_stream,
};
pub use error::{ClientError, ClientResult};
pub use http::{DEFAULT_BACKEND_HOST, HttpBackend};
pub use sse::{SseDecoder, SseFrame};
