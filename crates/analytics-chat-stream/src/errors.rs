/// Errors returned by the public client API and by transports before a
/// session's events are established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request passed to the engine.
    #[error("validation error: {0}")]
    Validation(String),
    /// Transport or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Backend answered with a non-success HTTP status.
    #[error("stream request failed with status {status_code}: {message}")]
    Status { status_code: u16, message: String },
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a status error for a non-success response.
    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status_code,
            message: message.into(),
        }
    }
}

/// Terminal session failure delivered through `SessionEvent::Error`.
///
/// Cancellation is deliberately absent: an aborted session goes quiet instead
/// of reporting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum SessionFailure {
    /// The backend rejected the request before streaming started.
    #[error("stream rejected with status {status_code}: {message}")]
    Status { status_code: u16, message: String },
    /// The network failed before or during streaming.
    #[error("transport failure: {message}")]
    Transport { message: String },
}

impl From<&StreamError> for SessionFailure {
    fn from(err: &StreamError) -> Self {
        match err {
            StreamError::Status {
                status_code,
                message,
            } => Self::Status {
                status_code: *status_code,
                message: message.clone(),
            },
            other => Self::Transport {
                message: other.to_string(),
            },
        }
    }
}

/// Non-fatal failure to turn one result block into a payload.
///
/// Only the offending block is discarded; the session keeps streaming.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultBlockError {
    /// Neither the block nor any balanced object inside it decoded as JSON.
    #[error("result block is not valid JSON: {message}")]
    InvalidJson { message: String },
    /// The decoded value is not an object with a string `result_type`.
    #[error("result block has no result_type discriminator")]
    MissingResultType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_their_code_as_session_failures() {
        let failure = SessionFailure::from(&StreamError::status(503, "unavailable"));
        assert_eq!(
            failure,
            SessionFailure::Status {
                status_code: 503,
                message: "unavailable".into()
            }
        );
    }

    #[test]
    fn other_errors_become_transport_failures() {
        let failure = SessionFailure::from(&StreamError::transport("connection reset"));
        assert!(
            matches!(failure, SessionFailure::Transport { message } if message.contains("connection reset"))
        );
    }
}
