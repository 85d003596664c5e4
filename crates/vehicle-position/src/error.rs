//! # Decode Errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a raw message could not be turned into a position report. The
/// message is dropped; ingestion continues.
#[derive(Error, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecodeError {
    #[error("code: malformed_payload, description: {0}")]
    MalformedPayload(String),

    #[error("code: malformed_topic, description: {0}")]
    MalformedTopic(String),
}

impl DecodeError {
    /// Returns the error code.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::MalformedTopic(_) => "malformed_topic",
        }
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedPayload(format!("failed to deserialize message: {err}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn serde_error() {
        let err: DecodeError = serde_json::from_str::<serde_json::Value>(r#"{"VP": "#)
            .map_err(Into::into)
            .unwrap_err();

        assert_eq!(err.code(), "malformed_payload");
        assert!(err.to_string().starts_with(
            "code: malformed_payload, description: failed to deserialize message: EOF while parsing"
        ));
    }
}
