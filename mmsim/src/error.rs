//! Error handling module for the mmsim CLI.
//!
//! Structured errors for workload setup and verification, built with
//! `thiserror`. The entry point wraps them in `anyhow` for context.

use mmgc::HeapRef;
use thiserror::Error;

/// Main error type for the mmsim CLI.
#[derive(Error, Debug)]
pub enum SimError {
    /// Invalid command-line combination.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error reported by the memory manager.
    #[error("Memory manager error: {0}")]
    Memory(#[from] mmgc::MmError),

    /// Invalid memory manager configuration.
    #[error("Configuration error: {0}")]
    Config(#[from] mmgc::ConfigError),

    /// A reachable object was freed by the collector.
    #[error("Reachable object {handle} was freed (iteration {iteration})")]
    LostObject { handle: HeapRef, iteration: usize },

    /// A full collection left unreachable objects behind.
    #[error("{survivors} unreachable objects survived a full collection")]
    Leaked { survivors: usize },

    /// Logging could not be installed.
    #[error("Failed to initialize logging: {0}")]
    Logging(String),

    /// Report serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using SimError.
pub type Result<T> = std::result::Result<T, SimError>;
