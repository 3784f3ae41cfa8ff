//! Stream record parsing.
//!
//! Every line of a chat response is one JSON object with a `type`
//! discriminator. Only `content` records carry text; unknown types are
//! skipped so the backend can add record kinds without breaking clients.

use serde::Deserialize;

use crate::error::StreamError;

/// A parsed stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental piece of assistant text.
    Content(String),
    /// The backend finished generating.
    End,
    /// A record type this client does not know.
    Ignored {
        /// Value of the `type` field.
        kind: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Parse one complete line.
///
/// # Errors
///
/// Returns [`StreamError::Parse`] if the line is not a JSON object with a
/// string `type`, or if a `content` record lacks a string `data` field.
pub fn parse_line(line: &str) -> Result<StreamEvent, StreamError> {
    let record: RawRecord = serde_json::from_str(line).map_err(|e| StreamError::Parse {
        line: line.to_string(),
        reason: e.to_string(),
    })?;

    match record.kind.as_str() {
        "content" => match record.data {
            Some(serde_json::Value::String(text)) => Ok(StreamEvent::Content(text)),
            _ => Err(StreamError::Parse {
                line: line.to_string(),
                reason: "content record without string data".to_string(),
            }),
        },
        "end" => Ok(StreamEvent::End),
        _ => Ok(StreamEvent::Ignored { kind: record.kind }),
    }
}
