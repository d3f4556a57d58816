//! Error types for seqwire.

use thiserror::Error;

/// Main error type for all RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (handshake and text codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (malformed record, bad handshake line, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The handshake carried the wrong magic number.
    #[error("invalid magic number: {0:#x}")]
    InvalidMagicNumber(u32),

    /// The handshake named a codec that is unknown or not enabled.
    #[error("invalid codec type: {0}")]
    UnsupportedCodec(String),

    /// A record length exceeds the configured maximum.
    #[error("record size {size} exceeds maximum {max}")]
    RecordTooLarge {
        /// Announced record size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Error text returned by the remote method.
    #[error("{0}")]
    Application(String),

    /// A response body could not be decoded into the reply type.
    #[error("rpc client: read body error: {0}")]
    BodyDecode(String),

    /// The client is closing or has been shut down.
    #[error("connection is shutdown")]
    Shutdown,

    /// The connection failed while the call was pending.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// Method name is not of the form `Service.Method`.
    #[error("rpc: service/method request ill-formed: {0}")]
    InvalidMethodName(String),

    /// A method with this name is already registered.
    #[error("rpc: method already defined: {0}")]
    DuplicateMethod(String),

    /// Peer closed the stream at a record boundary.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
