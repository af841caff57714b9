//! Server timestamp parsing.
//!
//! The backend emits ISO-8601 strings with microsecond precision, sometimes
//! with an explicit offset (`+00:00` or `+0000`) and sometimes naive
//! (implicitly UTC).

use chrono::{DateTime, NaiveDateTime, Utc};
use snafu::ResultExt;

use crate::error::{ChatResult, InvalidTimestampSnafu};

const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";
const COMPACT_OFFSET_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%z";

pub fn parse_server_timestamp(raw: &str) -> ChatResult<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(trimmed, COMPACT_OFFSET_FORMAT) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(trimmed, NAIVE_FORMAT).context(
        InvalidTimestampSnafu {
            stage: "parse-server-timestamp",
            raw: raw.to_string(),
        },
    )?;
    Ok(naive.and_utc())
}

/// Serde adapter for `DateTime<Utc>` fields that accepts naive server output.
pub mod serde_utc {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_server_timestamp(&raw).map_err(serde::de::Error::custom)
    }
}
