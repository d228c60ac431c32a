//! Error types for the history client

use thiserror::Error;

/// History client error
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Durable storage read/write failed (quota, permissions, corruption)
    #[error("storage error: {0}")]
    Storage(String),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// RPC node returned an error
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Unexpected response shape from the RPC node
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Not a valid base58 32-byte address
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;
