//! GC Logging and Tracing
//!
//! Structured logging for collector operations, useful for:
//! - Pause analysis of incremental steps
//! - Debugging missing roots and barriers
//! - Monitoring heap growth in a host
//!
//! Every recorded [`GcEvent`] is kept in the logger's buffer and forwarded
//! to the `log` facade under the `mmgc::gc` target.
//!
//! Log Levels:
//! - ERROR: cross-validation failures
//! - WARN: unusual conditions
//! - INFO: cycles, heap statistics, limit adjustments
//! - DEBUG: state transitions, chunk growth and release
//! - TRACE: individual step slices

use crate::gc::GcState;
use crate::heap::Space;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Log level for collector events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

/// Collector event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GcEvent {
    /// Collection cycle started
    CycleStart {
        cycle: u64,
        reason: String,
        used_bytes: usize,
    },

    /// State machine moved to a new state
    StateEntered { cycle: u64, state: GcState },

    /// One incremental step returned
    StepSlice {
        cycle: u64,
        duration_us: u64,
        state: GcState,
    },

    /// Collection cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        freed_objects: usize,
        freed_bytes: usize,
        used_bytes: usize,
    },

    /// Heap statistics
    HeapStats {
        reserved_bytes: usize,
        allocated_bytes: usize,
        used_bytes: usize,
        unmanaged_bytes: usize,
    },

    /// Unmanaged heap limit changed
    LimitAdjusted {
        old_limit: usize,
        new_limit: usize,
        usage: usize,
    },

    /// A block allocator requested a new chunk
    ChunkGrowth { space: Space, chunks: usize },

    /// Empty chunks were returned to the chunk source
    ChunksReleased { space: Space, count: usize },

    /// Result of a reachability cross-check
    CrossValidation { checked: usize, missing: usize },
}

/// Logger configuration
#[derive(Debug, Clone)]
pub struct GcLoggerConfig {
    /// Minimum level recorded and forwarded
    pub level: LogLevel,

    /// Forward events as JSON instead of text
    pub json: bool,

    /// Keep events in the in-memory buffer
    pub record: bool,

    /// Buffer capacity, oldest events are dropped beyond it
    pub capacity: usize,

    /// Report state transitions at info level
    pub verbose: bool,
}

impl Default for GcLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            json: false,
            record: true,
            capacity: 4096,
            verbose: false,
        }
    }
}

/// Collector logger shared between a memory manager and its host
pub struct GcLogger {
    config: GcLoggerConfig,
    events: Mutex<VecDeque<(DateTime<Local>, GcEvent)>>,
    enabled: AtomicBool,
}

impl GcLogger {
    /// Create new logger
    pub fn new(config: GcLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record an event and forward it to `log`
    pub fn log(&self, event: GcEvent) {
        if !self.is_enabled() {
            return;
        }

        let level = self.event_level(&event);
        if level > self.config.level {
            return;
        }

        let log_level: log::Level = level.into();
        if log::log_enabled!(target: "mmgc::gc", log_level) {
            let message = if self.config.json {
                Self::format_json(&event)
            } else {
                Self::format_human(&event)
            };
            log::log!(target: "mmgc::gc", log_level, "{}", message);
        }

        if self.config.record {
            let mut events = self.events.lock();
            if events.len() == self.config.capacity {
                events.pop_front();
            }
            events.push_back((Local::now(), event));
        }
    }

    /// Level an event is reported at
    pub fn event_level(&self, event: &GcEvent) -> LogLevel {
        match event {
            GcEvent::CrossValidation { missing, .. } if *missing > 0 => LogLevel::Error,
            GcEvent::CycleStart { .. }
            | GcEvent::CycleEnd { .. }
            | GcEvent::HeapStats { .. }
            | GcEvent::LimitAdjusted { .. } => LogLevel::Info,
            GcEvent::StateEntered { .. } if self.config.verbose => LogLevel::Info,
            GcEvent::StateEntered { .. }
            | GcEvent::ChunkGrowth { .. }
            | GcEvent::ChunksReleased { .. }
            | GcEvent::CrossValidation { .. } => LogLevel::Debug,
            GcEvent::StepSlice { .. } => LogLevel::Trace,
        }
    }

    /// Human-readable form of an event
    pub fn format_human(event: &GcEvent) -> String {
        match event {
            GcEvent::CycleStart {
                cycle,
                reason,
                used_bytes,
            } => format!(
                "[GC] Cycle {} started (reason: {}, used {} bytes)",
                cycle, reason, used_bytes
            ),
            GcEvent::StateEntered { cycle, state } => {
                format!("[GC] Cycle {}: entered {:?}", cycle, state)
            },
            GcEvent::StepSlice {
                cycle,
                duration_us,
                state,
            } => format!(
                "[GC] Cycle {}: step took {} us, now in {:?}",
                cycle, duration_us, state
            ),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                freed_objects,
                freed_bytes,
                used_bytes,
            } => format!(
                "[GC] Cycle {} completed ({:.2}ms, freed {} objects / {} bytes, {} bytes in use)",
                cycle, duration_ms, freed_objects, freed_bytes, used_bytes
            ),
            GcEvent::HeapStats {
                reserved_bytes,
                allocated_bytes,
                used_bytes,
                unmanaged_bytes,
            } => format!(
                "[GC] Heap: {} used / {} allocated / {} reserved, {} unmanaged",
                used_bytes, allocated_bytes, reserved_bytes, unmanaged_bytes
            ),
            GcEvent::LimitAdjusted {
                old_limit,
                new_limit,
                usage,
            } => format!(
                "[GC] Unmanaged limit {} -> {} (usage {})",
                old_limit, new_limit, usage
            ),
            GcEvent::ChunkGrowth { space, chunks } => {
                format!("[GC] {}: grew to {} chunks", space.name(), chunks)
            },
            GcEvent::ChunksReleased { space, count } => {
                format!("[GC] {}: released {} empty chunks", space.name(), count)
            },
            GcEvent::CrossValidation { checked, missing } => format!(
                "[GC] Cross-validation: {} reachable, {} unmarked",
                checked, missing
            ),
        }
    }

    /// JSON form of an event
    pub fn format_json(event: &GcEvent) -> String {
        serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e))
    }

    /// Snapshot of recorded events, oldest first
    pub fn events(&self) -> Vec<(DateTime<Local>, GcEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(GcLoggerConfig::default())
    }
}

impl std::fmt::Debug for GcLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcLogger")
            .field("config", &self.config)
            .field("events", &self.event_count())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(cycle: u64) -> GcEvent {
        GcEvent::CycleStart {
            cycle,
            reason: "explicit".to_string(),
            used_bytes: 0,
        }
    }

    #[test]
    fn test_gc_logger_basic() {
        let logger = GcLogger::default();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_gc_logger_disable() {
        let logger = GcLogger::default();
        logger.disable();
        logger.log(start(1));
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_level_filter() {
        let logger = GcLogger::new(GcLoggerConfig {
            level: LogLevel::Info,
            ..Default::default()
        });
        logger.log(GcEvent::StepSlice {
            cycle: 1,
            duration_us: 10,
            state: GcState::MarkDrain,
        });
        logger.log(start(1));
        assert_eq!(logger.event_count(), 1);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let logger = GcLogger::new(GcLoggerConfig {
            capacity: 2,
            ..Default::default()
        });
        for cycle in 0..3 {
            logger.log(start(cycle));
        }
        let events = logger.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].1, start(1));
    }

    #[test]
    fn test_json_format() {
        let json = GcLogger::format_json(&GcEvent::ChunksReleased {
            space: Space::Objects,
            count: 3,
        });
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "chunks_released");
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn test_verbose_promotes_transitions() {
        let quiet = GcLogger::default();
        let verbose = GcLogger::new(GcLoggerConfig {
            verbose: true,
            ..Default::default()
        });
        let event = GcEvent::StateEntered {
            cycle: 1,
            state: GcState::Sweep,
        };
        assert_eq!(quiet.event_level(&event), LogLevel::Debug);
        assert_eq!(verbose.event_level(&event), LogLevel::Info);
    }
}
