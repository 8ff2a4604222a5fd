//! services/engine/src/error.rs
//!
//! Defines the primary error type for the entire engine service.

use crate::config::ConfigError;
use storyloom_core::ports::PortError;

/// The primary error type for the `engine` service.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// The queue is at capacity and holds nothing evictable.
    #[error("Offline queue is full and no request is evictable")]
    QueueFull,

    /// Represents a serialization failure on one of the JSON stores.
    #[error("Serialization Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Represents a standard Input/Output error (e.g., writing the queue file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}
