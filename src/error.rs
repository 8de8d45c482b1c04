//! Error types shared across the crate
//!
//! Storage errors never leave the cache facade; fetch errors are the only ones
//! a library caller sees.

use thiserror::Error;

/// Errors raised by a durable store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem read/write failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite rejected the operation
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored record could not be decoded
    #[error("Corrupt record for key '{key}': {reason}")]
    Corrupt {
        /// Logical key of the record
        key: String,
        /// Why decoding failed
        reason: String,
    },

    /// A record could not be encoded for storage
    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The backend could not run the operation at all
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Whether this error means the record itself is unreadable
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}

/// Errors surfaced by the cached fetch wrapper
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The transport failed for a reason other than reqwest
    #[error("Transport failed: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("Request to {url} failed with status {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// The response body was not valid JSON for the requested type
    #[error("Failed to parse JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}
