//! Error types for request dispatch failures.
//!
//! Engine faults are not errors at this layer: they are ordinary responses.
//! The variants here cover requests the daemon could not interpret and
//! failures of the connection itself.

use std::io;

use thiserror::Error;

/// Errors surfaced during request parsing and dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Request line could not be parsed as valid JSON.
    #[error("malformed JSONL: {message}")]
    MalformedJsonl {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The method name is not part of the protocol.
    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    /// The parameters do not match the method's schema.
    #[error("invalid params for '{method}': {message}")]
    InvalidParams { method: String, message: String },

    /// Request exceeds the maximum allowed size.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge { size: usize, max_size: usize },

    /// The simulator has been shut down.
    #[error("simulator is shutting down")]
    ShuttingDown,

    /// IO error during read or write.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Response serialization failed.
    #[error("failed to serialize response: {0}")]
    SerializeResponse(#[from] serde_json::Error),
}

impl DispatchError {
    /// Returns true when the connection must be closed after reporting
    /// this error.
    ///
    /// A client that sent an unparseable or oversized line cannot be trusted
    /// to be at a line boundary any more, so the stream is abandoned. Bad
    /// parameters on an otherwise well-formed request leave the connection
    /// usable.
    pub fn closes_connection(&self) -> bool {
        match self {
            Self::UnknownMethod { .. } | Self::InvalidParams { .. } => false,
            Self::MalformedJsonl { .. }
            | Self::RequestTooLarge { .. }
            | Self::ShuttingDown
            | Self::Io(_)
            | Self::SerializeResponse(_) => true,
        }
    }

    /// Creates a malformed JSONL error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedJsonl {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed JSONL error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedJsonl {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an unknown method error.
    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    /// Creates an invalid params error.
    pub fn invalid_params(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a request too large error.
    pub fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(DispatchError::unknown_method("bogus"), false)]
    #[case(DispatchError::invalid_params("invoke", "missing field `obj`"), false)]
    #[case(DispatchError::malformed("empty request line"), true)]
    #[case(DispatchError::request_too_large(10, 5), true)]
    #[case(DispatchError::ShuttingDown, true)]
    fn only_framing_failures_close_the_connection(
        #[case] error: DispatchError,
        #[case] closes: bool,
    ) {
        assert_eq!(error.closes_connection(), closes);
    }
}
