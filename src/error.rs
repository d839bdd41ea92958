//! Error types for ThrottleX.

use thiserror::Error;

/// Main error type for ThrottleX operations.
#[derive(Error, Debug)]
pub enum ThrottleError {
    /// A policy names an algorithm the dispatcher does not implement
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A policy violates its parameter invariants
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// The persistence collaborator could not serve the request
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Persisted usage state violates its invariants
    #[error("Usage state corrupted: {0}")]
    StateCorruption(String),

    /// No policy is persisted for the key
    #[error("No policy found for key: {0}")]
    PolicyNotFound(String),

    /// A policy already exists for the key
    #[error("Policy already exists for key: {0}")]
    PolicyExists(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ThrottleX operations.
pub type Result<T> = std::result::Result<T, ThrottleError>;
