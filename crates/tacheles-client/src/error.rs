//! Error types for the chat client.
//!
//! `ClientError` covers plain request/response calls to the backend.
//! `StreamError` covers everything that can end a streamed chat response.

use thiserror::Error;

/// Prefix of every error shown to the user.
const USER_MESSAGE_PREFIX: &str = "We've encountered an error when trying to communicate \
     with our backend. It's probably not you, it's us. Please try again later.";

/// A result type using `ClientError`.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors from backend API calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    /// Network failure while talking to the backend.
    #[error("{source}")]
    Http {
        /// Endpoint path that was called.
        endpoint: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("Error {status}")]
    Status {
        /// Endpoint path that was called.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("failed to parse response: {message}")]
    Parse {
        /// Endpoint path that was called.
        endpoint: String,
        /// Parser message.
        message: String,
    },

    /// An operation needs a user/conversation that has not been set up yet.
    #[error("client is not initialized")]
    NotInitialized,
}

impl ClientError {
    pub(crate) fn http(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Http {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Endpoint the error happened on, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            Self::Http { endpoint, .. }
            | Self::Status { endpoint, .. }
            | Self::Parse { endpoint, .. } => Some(endpoint),
            Self::Build(_) | Self::NotInitialized => None,
        }
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.endpoint() {
            Some(endpoint) => user_facing(&self.to_string(), endpoint),
            None => format!("{USER_MESSAGE_PREFIX} [Technical details: {self}]"),
        }
    }
}

/// Errors that end a streamed chat response.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The request failed or the connection broke.
    #[error(transparent)]
    Transport(#[from] ClientError),

    /// The user message could not be turned into a chat request.
    #[error("invalid chat request: {0}")]
    Request(#[from] tacheles_core::CoreError),

    /// A complete line was not valid UTF-8.
    #[error("stream is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// A line was not a valid stream record.
    #[error("malformed stream record: {reason}")]
    Parse {
        /// The offending line.
        line: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The stream did not finish within the configured number of reads.
    #[error("stream exceeded {limit} reads")]
    Overflow {
        /// Configured read limit.
        limit: u64,
    },

    /// The stream was cancelled on purpose.
    #[error("stream cancelled")]
    Cancelled,
}

impl StreamError {
    /// Whether this is a deliberate cancellation rather than a failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Transport(err) => err.user_message(),
            other => user_facing(&other.to_string(), crate::api::CHAT_ENDPOINT),
        }
    }
}

fn user_facing(detail: &str, endpoint: &str) -> String {
    format!("{USER_MESSAGE_PREFIX} [Technical details: {detail} on {endpoint}]")
}
