//! Error types for the HTTP codec.

use thiserror::Error;

/// Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The request line is missing or has fewer than three tokens.
    #[error("malformed request line: {0}")]
    MalformedRequestLine(String),

    /// The status line is missing or does not carry a numeric code.
    #[error("malformed status line: {0}")]
    MalformedStatusLine(String),

    /// Head bytes are not valid UTF-8 up to the end of headers.
    #[error("head is not valid UTF-8")]
    InvalidEncoding,
}
