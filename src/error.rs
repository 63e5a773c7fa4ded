//! Error types for the JoeDB client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum JoedbError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (bad header, oversized payload, stream desync).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Malformed filter specification (unsupported operator, bad regex).
    #[error("Filter error: {0}")]
    Filter(String),

    /// Connection string did not parse.
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    /// The authenticate handshake came back with a non-OK status.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Connection closed while requests were still pending.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Every correlation tag is tied to an in-flight request.
    #[error("Correlation tag space exhausted")]
    TagSpaceExhausted,

    /// Write queue stayed full past the configured timeout.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using JoedbError.
pub type Result<T> = std::result::Result<T, JoedbError>;
