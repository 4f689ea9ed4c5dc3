//! Configuration Module - Collector Tuning Parameters
//!
//! Manages all tunables for the memory manager.
//! Defaults match an interactive host: time-sliced collection with a small
//! per-step budget, statistics off, debug modes off.

use crate::heap::{AVAILABLE_SLOTS, SLOT_SIZE};
use std::time::Duration;

/// Main configuration for the memory manager
///
/// # Examples
///
/// ```rust
/// use mmgc::MmConfig;
///
/// // Stress-test configuration: collect before every allocation
/// let config = MmConfig {
///     aggressive_gc: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct MmConfig {
    /// Force a full collection before every allocation
    ///
    /// Debug mode for flushing out missing roots and barriers.
    /// Default: false
    pub aggressive_gc: bool,

    /// Collect allocation statistics
    ///
    /// Enables per-bin allocation counters and peak memory tracking dumps.
    /// Default: false
    pub gc_stats: bool,

    /// Collect per-cycle collector statistics
    ///
    /// Counts destroyed objects per class name and logs marked/used
    /// memory before and after each cycle.
    /// Default: false
    pub gc_collector_stats: bool,

    /// Time budget for one incremental step in microseconds
    ///
    /// 0 disables time slicing: `step()` runs the cycle to completion.
    /// Default: 5000 (5ms)
    pub gc_time_limit_us: u64,

    /// Work items processed between two deadline checks
    ///
    /// Applies to draining the mark stack and walking persistent/weak
    /// value pages.
    /// Default: 1024
    pub mark_batch_size: usize,

    /// Floor for the adaptive unmanaged heap limit in bytes
    ///
    /// Default: 128KB
    pub min_unmanaged_heap_size_gc_limit: usize,

    /// Total slots below which `should_run_gc()` never fires
    ///
    /// Default: 16 chunks worth of slots
    pub min_slots_gc_limit: usize,

    /// Allowed heap over-allocation relative to the live set, in percent
    ///
    /// `should_run_gc()` fires once total slots exceed
    /// `used_after_last_sweep * gc_overallocation_percent / 100`.
    /// Default: 200
    pub gc_overallocation_percent: usize,

    /// Recompute reachability before each sweep and verify mark bits
    ///
    /// Expensive. Any reachable but unmarked object is a fatal defect.
    /// Default: false
    pub cross_validate_incremental_gc: bool,

    /// Return completely empty chunks to the chunk source after each sweep
    ///
    /// Default: true
    pub release_empty_chunks: bool,

    /// Enable verbose collector logging
    ///
    /// Promotes per-state transition events to the info level.
    /// Default: false
    pub verbose: bool,
}

impl Default for MmConfig {
    fn default() -> Self {
        MmConfig {
            // Debug
            aggressive_gc: false,
            gc_stats: false,
            gc_collector_stats: false,
            cross_validate_incremental_gc: false,
            verbose: false,

            // Incremental
            gc_time_limit_us: 5_000,
            mark_batch_size: 1024,

            // Heuristics
            min_unmanaged_heap_size_gc_limit: 128 * KB,
            min_slots_gc_limit: AVAILABLE_SLOTS * 16,
            gc_overallocation_percent: 200,

            // Chunks
            release_empty_chunks: true,
        }
    }
}

impl MmConfig {
    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mmgc::MmConfig;
    ///
    /// let config = MmConfig {
    ///     mark_batch_size: 0,  // Invalid!
    ///     ..Default::default()
    /// };
    ///
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mark_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(
                "mark_batch_size must be > 0".to_string(),
            ));
        }

        if self.min_unmanaged_heap_size_gc_limit < SLOT_SIZE {
            return Err(ConfigError::InvalidLimit(format!(
                "min_unmanaged_heap_size_gc_limit must be at least one slot ({} bytes)",
                SLOT_SIZE
            )));
        }

        if self.gc_overallocation_percent < 100 {
            return Err(ConfigError::InvalidOverallocation(
                "gc_overallocation_percent must be >= 100".to_string(),
            ));
        }

        Ok(())
    }

    /// Time budget for one `step()`, `None` when time slicing is disabled
    pub fn time_limit(&self) -> Option<Duration> {
        if self.gc_time_limit_us == 0 {
            None
        } else {
            Some(Duration::from_micros(self.gc_time_limit_us))
        }
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - MM_AGGRESSIVE_GC
    /// - MM_GC_STATS
    /// - MM_GC_COLLECTOR_STATS
    /// - MM_GC_TIMELIMIT (milliseconds, 0 disables time slicing)
    /// - MM_CROSS_VALIDATE_INCREMENTAL_GC
    ///
    /// # Examples
    ///
    /// ```bash
    /// export MM_AGGRESSIVE_GC=1
    /// export MM_GC_TIMELIMIT=2
    /// ```
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(flag) = env_flag("MM_AGGRESSIVE_GC") {
            config.aggressive_gc = flag;
        }

        if let Some(flag) = env_flag("MM_GC_STATS") {
            config.gc_stats = flag;
        }

        if let Some(flag) = env_flag("MM_GC_COLLECTOR_STATS") {
            config.gc_collector_stats = flag;
        }

        if let Ok(val) = std::env::var("MM_GC_TIMELIMIT") {
            if let Ok(ms) = val.parse::<u64>() {
                config.gc_time_limit_us = ms.saturating_mul(1000);
            }
        }

        if let Some(flag) = env_flag("MM_CROSS_VALIDATE_INCREMENTAL_GC") {
            config.cross_validate_incremental_gc = flag;
        }

        config
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|val| val == "1" || val.eq_ignore_ascii_case("true"))
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid mark batch size: {0}")]
    InvalidBatchSize(String),

    #[error("Invalid limit: {0}")]
    InvalidLimit(String),

    #[error("Invalid overallocation: {0}")]
    InvalidOverallocation(String),
}

const KB: usize = 1024;
