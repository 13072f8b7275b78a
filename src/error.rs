//! Aura memory error types

use thiserror::Error;

/// Aura memory error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input that cannot produce a memory (e.g. an empty instruction)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reasoning collaborator failed or timed out
    #[error("Extraction unavailable: {0}")]
    ExtractionUnavailable(String),

    /// A single item does not fit the storage limit on its own
    #[error("Oversized item: {size} bytes exceeds limit of {limit} bytes")]
    OversizedItem {
        /// Serialized size of the offending collection
        size: usize,
        /// Configured storage limit
        limit: usize,
    },

    /// Persistence collaborator error
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Aura memory operations
pub type Result<T> = std::result::Result<T, Error>;
