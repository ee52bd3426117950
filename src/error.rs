//! Error types for minrpc.

use thiserror::Error;

/// Main error type for all minrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error during stream operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (handshake and JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (bad magic number, unknown codec, oversized frame).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A service-method string that is not exactly `Service.Method`.
    #[error("service-method {0:?} ill-formatted, want \"Service.Method\"")]
    InvalidServiceMethod(String),

    /// No service registered under the given name.
    #[error("service {0:?} not found")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("method {0:?} not found")]
    MethodNotFound(String),

    /// Invalid service configuration caught at registration time.
    #[error("invalid service: {0}")]
    InvalidService(String),

    /// Failure reported by a method handler.
    #[error("{0}")]
    Handler(String),

    /// Error reported by the remote peer in a response header.
    #[error("remote error: {0}")]
    Remote(String),

    /// The connection was lost while calls were in flight.
    #[error("connection lost: {0}")]
    Disconnected(String),

    /// The client was shut down; no further sends are possible.
    #[error("client is shut down")]
    Shutdown,
}

impl RpcError {
    /// Build a handler failure from any message.
    ///
    /// The message travels to the caller in the response header's error field.
    pub fn handler(msg: impl Into<String>) -> Self {
        RpcError::Handler(msg.into())
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
