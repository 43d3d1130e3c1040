//! Error types for the relay.
//!
//! Every variant maps to a stable taxonomy kind (see [`RelayError::kind`]) that is
//! reported to callers in the structured error body, and to an HTTP status.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("not implement: {operation} is not supported by this provider")]
    NotSupported { operation: &'static str },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Poll attempt failed: {0}")]
    PollTransient(String),

    #[error("Task failed: {reason}")]
    PollFatal { reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    pub fn not_supported(operation: &'static str) -> Self {
        Self::NotSupported { operation }
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn poll_fatal(reason: impl Into<String>) -> Self {
        Self::PollFatal {
            reason: reason.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Stable taxonomy name reported as `error.type`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotSupported { .. } => "not_supported",
            Self::Transport(_) => "transport_error",
            Self::UpstreamStatus { .. } => "upstream_status_error",
            Self::Decode(_) => "decode_error",
            Self::PollTransient(_) => "poll_transient",
            Self::PollFatal { .. } => "poll_fatal",
            Self::Timeout(_) => "timeout",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::NotFound(_) => "not_found",
            Self::Config { .. } => "config_error",
            Self::Io(_) | Self::Json(_) | Self::Toml(_) => "internal_error",
        }
    }

    /// HTTP status used when this error is surfaced before a response body starts.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotSupported { .. } | Self::NotFound(_) => 404,
            Self::UpstreamStatus { status, .. } => *status,
            Self::InvalidRequest(_) => 400,
            Self::Timeout(_) => 504,
            Self::Transport(_) | Self::Decode(_) | Self::PollTransient(_) | Self::PollFatal { .. } => {
                502
            }
            Self::Config { .. } | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 500,
        }
    }

    /// Record-level decode failures are skipped by the streaming engine; anything
    /// else a decoder reports ends the stream.
    #[must_use]
    pub fn is_skippable_record(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_supported_is_distinct_from_generic_failures() {
        let err = RelayError::not_supported("rerank");
        assert_eq!(err.kind(), "not_supported");
        assert_eq!(err.status_code(), 404);
        assert!(err.to_string().contains("rerank"));

        let other = RelayError::transport("connection reset");
        assert_ne!(other.kind(), err.kind());
    }

    #[test]
    fn upstream_status_keeps_provider_status_and_body() {
        let err = RelayError::UpstreamStatus {
            status: 429,
            body: r#"{"error":"slow down"}"#.to_string(),
        };
        assert_eq!(err.status_code(), 429);
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn only_decode_errors_are_skippable() {
        assert!(RelayError::decode("bad json").is_skippable_record());
        assert!(!RelayError::poll_fatal("boom").is_skippable_record());
        assert!(!RelayError::transport("eof").is_skippable_record());
    }
}
