//! Error Module - Memory Manager Error Types
//!
//! Defines all error types used in mmgc.
//!
//! # Error Categories
//!
//! ## Fatal Errors
//! - `ChunkSourceExhausted` - The chunk source could not hand out a segment
//! - `SegmentMapping` - The OS refused to map a segment
//!
//! ## Handle Errors
//! - `InvalidHandle` - A `HeapRef` does not name a live object
//! - `OutOfBounds` - Word index past the end of an object
//! - `NotAWeakContainer` - Weak container operation on an unregistered object
//! - `AlreadyRegistered` - Object registered twice as a weak container
//! - `InvalidPersistent` - Persistent or weak slot id is stale
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration
//! - `InvalidState` - Invalid collector state

use crate::config::ConfigError;
use crate::heap::HeapRef;
use thiserror::Error;

/// Main error type for all mmgc operations
///
/// Allocation itself never returns this type: a chunk source failure during
/// allocation is fatal (see [`MmError::is_fatal`]). Everything that takes a
/// handle from the caller reports misuse through it instead of panicking.
///
/// # Examples
///
/// ```rust
/// use mmgc::MmError;
///
/// fn describe(err: &MmError) -> &'static str {
///     match err {
///         MmError::ChunkSourceExhausted { .. } => "out of memory",
///         MmError::InvalidHandle(_) => "stale handle",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum MmError {
    /// The chunk source could not supply a segment
    ///
    /// **When returned:** `ChunkSource::allocate` failed
    ///
    /// **Recovery strategy:** None at this layer, the memory manager aborts
    /// the allocation with a panic after logging
    #[error("Chunk source exhausted: requested {requested} bytes ({reason})")]
    ChunkSourceExhausted { requested: usize, reason: String },

    /// Anonymous mapping failed
    ///
    /// **When returned:** `memmap2` could not create the mapping
    #[error("Segment mapping failed: {0}")]
    SegmentMapping(#[from] std::io::Error),

    /// Handle does not refer to a live object
    ///
    /// **When returned:** The slot was swept, never allocated, or the chunk
    /// was released
    #[error("Invalid heap handle: {0}")]
    InvalidHandle(HeapRef),

    /// Word index past the end of an object
    ///
    /// **When returned:** Word access through the memory manager
    #[error("Word {word} out of bounds for {handle} ({words} words)")]
    OutOfBounds {
        handle: HeapRef,
        word: usize,
        words: usize,
    },

    /// Object is not a registered weak map or weak set
    #[error("Object {0} is not a registered weak container")]
    NotAWeakContainer(HeapRef),

    /// Object is already registered as a weak container
    #[error("Object {0} is already registered as a weak container")]
    AlreadyRegistered(HeapRef),

    /// Persistent or weak value slot is not allocated
    #[error("Invalid persistent slot: page {0}, index {1}")]
    InvalidPersistent(u32, u32),

    /// Configuration error
    ///
    /// **When returned:** `MmConfig::validate` rejected the configuration
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid state
    ///
    /// **When returned:** An operation requires a different collector state
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl MmError {
    /// Check if this error cannot be recovered from at the memory manager layer
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MmError::ChunkSourceExhausted { .. } | MmError::SegmentMapping(_)
        )
    }

    /// Check if this error indicates a bug in the caller or in mmgc
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            MmError::InvalidHandle(_)
                | MmError::OutOfBounds { .. }
                | MmError::InvalidPersistent(..)
                | MmError::InvalidState { .. }
        )
    }
}

/// Result type alias for mmgc operations
pub type Result<T> = std::result::Result<T, MmError>;
