/// Cause handed to the error callback when a stream session fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Transport or stream I/O failed (connection drop, read error).
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Server answered the streaming request with a non-success status.
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
    /// An event payload could not be decoded as a completion delta.
    #[error("invalid completion delta: {message}")]
    Decode { message: String },
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a status error for a non-2xx response.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a payload decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Returns the HTTP status carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(value: serde_json::Error) -> Self {
        StreamError::decode(value.to_string())
    }
}

/// Invalid accumulator configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required value was empty.
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Error returned when a failure response body cannot be read.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to read response body: {0}")]
pub struct BodyReadError(pub String);
