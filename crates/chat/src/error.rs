use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("stream event is not valid JSON on `{stage}`: {source}"))]
    DecodeEnvelope {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stream event `{kind}` carries a malformed payload on `{stage}`: {source}"))]
    DecodePayload {
        stage: &'static str,
        kind: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stream event `{kind}` is missing its data payload"))]
    MissingPayload {
        stage: &'static str,
        kind: &'static str,
    },
    #[snafu(display("timestamp '{raw}' is not a recognised server timestamp"))]
    InvalidTimestamp {
        stage: &'static str,
        raw: String,
        source: chrono::ParseError,
    },
    #[snafu(display("'{raw}' is not a known data source (expected WEBSITE, SHOPIFY or CRMS)"))]
    UnknownDataSource { stage: &'static str, raw: String },
}

pub type ChatResult<T> = Result<T, ChatError>;
