//! Error types for the request/response bridge.

use std::fmt;

/// The main error type for the request/response bridge.
///
/// Per-request failures (everything except [`Error::InvalidArgument`]) surface
/// only through the submitter's response future; they never terminate the
/// shared pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A construction-time argument was rejected
    InvalidArgument(String),

    /// The input queue was full and the envelope was dropped
    Unavailable {
        /// Name of the processor that refused the envelope
        name: String,
    },

    /// The response deadline elapsed before a response was delivered
    Timeout {
        /// Diagnostic tag captured at admission
        tag: String,
    },

    /// A response failed the pairing check against its request
    NotCorrelated {
        /// Rendering of the admitted request
        request: String,
        /// Rendering of the response that arrived for it
        response: String,
    },

    /// The input queue reported an outcome outside the expected set
    UnexpectedOfferResult {
        /// Description of the unexpected outcome
        kind: String,
    },

    /// The pipeline shut down while the request was still pending
    Shutdown,

    /// A custom error with a message
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::Unavailable { name } => {
                write!(f, "Processor '{}' is unavailable (input queue full)", name)
            }
            Error::Timeout { tag } => write!(f, "Response timed out: {}", tag),
            Error::NotCorrelated { request, response } => {
                write!(
                    f,
                    "Response {} does not correlate with request {}",
                    response, request
                )
            }
            Error::UnexpectedOfferResult { kind } => {
                write!(f, "Unexpected offer result: {}", kind)
            }
            Error::Shutdown => write!(f, "Pipeline was shut down"),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {}

// Convenience constructors
impl Error {
    /// Create an invalid-argument error
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Create an unavailable error carrying the processor name
    pub fn unavailable<S: Into<String>>(name: S) -> Self {
        Error::Unavailable { name: name.into() }
    }

    /// Create a timeout error carrying the admission tag
    pub fn timeout<S: Into<String>>(tag: S) -> Self {
        Error::Timeout { tag: tag.into() }
    }

    /// Create a correlation-mismatch error from rendered request and response
    pub fn not_correlated<R: Into<String>, S: Into<String>>(request: R, response: S) -> Self {
        Error::NotCorrelated {
            request: request.into(),
            response: response.into(),
        }
    }

    /// Create an unexpected-offer-result error
    pub fn unexpected_offer<S: Into<String>>(kind: S) -> Self {
        Error::UnexpectedOfferResult { kind: kind.into() }
    }

    /// Create a custom error with a message
    pub fn custom<S: Into<String>>(message: S) -> Self {
        Error::Custom(message.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Custom(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Custom(s.to_string())
    }
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, Error>;
