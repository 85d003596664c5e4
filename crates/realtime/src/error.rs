//! Realtime service errors

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the crate.
pub type Result<T> = anyhow::Result<T, TransportError>;

/// Transport level failures. Recoverable through the reconnect policy.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached or refused the session.
    #[error("code: connect_failed, description: {0}")]
    ConnectFailed(String),

    /// An established session was lost or closed.
    #[error("code: disconnected, description: {0}")]
    Disconnected(String),

    /// A subscribe request could not be issued.
    #[error("code: subscribe_failed, description: {0}")]
    SubscribeFailed(String),
}

impl TransportError {
    /// Returns the stable error code associated with the variant.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::ConnectFailed(_) => "connect_failed",
            Self::Disconnected(_) => "disconnected",
            Self::SubscribeFailed(_) => "subscribe_failed",
        }
    }
}

impl From<anyhow::Error> for TransportError {
    fn from(err: anyhow::Error) -> Self {
        let chain = err.chain().map(ToString::to_string).collect::<Vec<_>>().join(" -> ");

        // if type is TransportError, return it with the newly added context
        if let Some(inner) = err.downcast_ref::<Self>() {
            tracing::debug!("Error: {err}, caused by: {inner}");

            return match inner {
                Self::ConnectFailed(_) => Self::ConnectFailed(chain),
                Self::Disconnected(_) => Self::Disconnected(chain),
                Self::SubscribeFailed(_) => Self::SubscribeFailed(chain),
            };
        }

        // otherwise, the session is considered lost
        Self::Disconnected(chain)
    }
}

/// Invalid connector configuration. Fatal at startup only.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigError {
    /// Broker host, port, or keep-alive cannot be used.
    #[error("code: invalid_broker, description: {0}")]
    InvalidBroker(String),

    /// Client identifier is unusable.
    #[error("code: invalid_client_id, description: {0}")]
    InvalidClientId(String),

    /// Topic filter list is empty or contains an ill-formed filter.
    #[error("code: invalid_topic, description: {0}")]
    InvalidTopic(String),

    /// Reconnect policy values are inconsistent.
    #[error("code: invalid_reconnect, description: {0}")]
    InvalidReconnect(String),

    /// Stale vehicle eviction settings are unusable.
    #[error("code: invalid_eviction, description: {0}")]
    InvalidEviction(String),
}

impl ConfigError {
    /// Returns the stable error code associated with the variant.
    #[must_use]
    pub const fn code(&self) -> &str {
        match self {
            Self::InvalidBroker(_) => "invalid_broker",
            Self::InvalidClientId(_) => "invalid_client_id",
            Self::InvalidTopic(_) => "invalid_topic",
            Self::InvalidReconnect(_) => "invalid_reconnect",
            Self::InvalidEviction(_) => "invalid_eviction",
        }
    }
}

#[macro_export]
macro_rules! invalid_topic {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ConfigError::InvalidTopic(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::ConfigError::InvalidTopic(format!($err))
    };
}

#[macro_export]
macro_rules! invalid_reconnect {
    ($fmt:expr, $($arg:tt)*) => {
        $crate::ConfigError::InvalidReconnect(format!($fmt, $($arg)*))
    };
     ($err:expr $(,)?) => {
        $crate::ConfigError::InvalidReconnect(format!($err))
    };
}

#[cfg(test)]
mod tests {
    use anyhow::{Context, Result, anyhow};
    use serde_json::Value;

    use super::{ConfigError, TransportError};

    #[test]
    fn error_display() {
        let err = TransportError::ConnectFailed("connection refused".to_string());
        assert_eq!(format!("{err}",), "code: connect_failed, description: connection refused");
        assert_eq!(err.code(), "connect_failed");
    }

    #[test]
    fn with_context() {
        let context_error = || -> Result<(), TransportError> {
            Err(TransportError::ConnectFailed("connection refused".to_string()))
                .context("opening session")
                .context("more context")?;
            Ok(())
        };

        let result = context_error();
        assert_eq!(
            result.unwrap_err(),
            TransportError::ConnectFailed(
                "more context -> opening session -> code: connect_failed, description: connection refused"
                    .to_string()
            )
        );
    }

    #[test]
    fn anyhow_context() {
        let result = Err::<(), anyhow::Error>(anyhow!("socket closed")).context("reading packet");
        let err: TransportError = result.unwrap_err().into();

        assert_eq!(err.to_string(), "code: disconnected, description: reading packet -> socket closed");
    }

    #[test]
    fn serde_context() {
        let result: Result<Value, anyhow::Error> =
            serde_json::from_str(r#"{"foo": "bar""#).context("error context");
        let err: TransportError = result.unwrap_err().into();

        assert_eq!(
            err.to_string(),
            "code: disconnected, description: error context -> EOF while parsing an object at line 1 column 13"
        );
    }

    #[test]
    fn config_macros() {
        let err = invalid_topic!("filter {} is empty", 2);
        assert_eq!(err, ConfigError::InvalidTopic("filter 2 is empty".to_string()));
        assert_eq!(err.code(), "invalid_topic");

        let err = invalid_reconnect!("multiplier must be at least 1");
        assert_eq!(err.to_string(), "code: invalid_reconnect, description: multiplier must be at least 1");
    }
}
