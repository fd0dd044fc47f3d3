//! Error types for serf-rpc-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error on the agent connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized record, malformed stream).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error string reported by the agent, verbatim.
    #[error("{0}")]
    Remote(String),

    /// The client has been shut down.
    #[error("client closed")]
    ClientClosed,

    /// A subscription was torn down before the agent acknowledged it.
    #[error("stream closed")]
    StreamClosed,

    /// Log level name not understood by the agent.
    #[error("unknown log level: {0}")]
    InvalidLogLevel(String),

    /// The agent closed the connection.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;
