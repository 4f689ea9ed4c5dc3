//! # MMGC - Incremental Mark-Sweep Memory Manager
//!
//! MMGC is the memory manager of an embedded scripting runtime. It hands out
//! zeroed, slot-aligned objects and reclaims unreachable ones with a
//! non-moving mark-sweep collector whose marking is split into time-bounded
//! steps, so the host's event loop never stalls for a whole cycle.
//!
//! ## Overview
//!
//! - **Block allocators**: 64 KiB chunks of 32-byte slots, bump allocation
//!   plus segregated free bins, one allocator for objects and one for
//!   internal class metadata
//! - **Huge items**: objects larger than a chunk get their own segment
//! - **Incremental state machine**: a resumable sequence of mark states
//!   driven by `step()` under a per-step time limit
//! - **Barriers**: objects allocated during marking are black, stored
//!   references are pushed for marking, the execution stack is re-scanned
//!   before sweep
//! - **Weak references**: weak value slots and weak maps/sets whose entries
//!   die with their keys
//! - **Adaptive triggers**: an unmanaged memory limit that doubles and halves
//!   with usage, and a slot overallocation heuristic for the event loop
//!
//! ## Quick Start
//!
//! ```rust
//! use mmgc::{MemoryManager, MmConfig, VTable};
//!
//! static PAIR: VTable = VTable {
//!     inline_values: 2,
//!     ..VTable::new("Pair", 16)
//! };
//!
//! fn main() -> mmgc::Result<()> {
//!     let mut mm = MemoryManager::new(MmConfig::default())?;
//!
//!     let head = mm.alloc_managed(&PAIR);
//!     let tail = mm.alloc_managed(&PAIR);
//!     mm.store_ref(head, 1, Some(tail))?;
//!     mm.set_global_object(Some(head));
//!
//!     // Let the host event loop drive the collector
//!     for _ in 0..16 {
//!         mm.on_event_loop();
//!     }
//!
//!     mm.run_gc();
//!     assert!(mm.contains(tail));
//!     Ok(())
//! }
//! ```
//!
//! ## Collection Cycle
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ MarkStart │──▶│ Global object│──▶│ JS stack    │──▶│ Persistent     │
//! └───────────┘   └──────────────┘   │ (break)     │   │ values (paged) │
//!                                    └─────────────┘   └───────┬────────┘
//!                                                              ▼
//! ┌───────────┐   ┌──────────────┐   ┌─────────────┐   ┌────────────────┐
//! │ Invalid   │◀──│ Sweep        │◀──│ MarkReady   │◀──│ Weak values,   │
//! │ (idle)    │   │ (atomic)     │   └─────────────┘   │ MarkDrain      │
//! └───────────┘   └──────────────┘                     └────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`allocator`]: Block and huge item allocators
//! - [`config`]: Configuration and environment overrides
//! - [`error`]: Error types
//! - [`gc`]: Collection state machine
//! - [`heap`]: Chunks, bitmaps, segments and object handles
//! - [`index`]: Typed ids and slabs
//! - [`logging`]: Structured collector events
//! - [`marker`]: Mark stack and root sets
//! - [`memory`]: The memory manager
//! - [`object`]: Vtables, object views and weak containers
//! - [`stats`]: Statistics, timers and pause histograms
//!
//! ## Limitations
//!
//! - **Single mutator**: a manager belongs to one thread; incremental means
//!   time-sliced, not concurrent
//! - **Non-moving**: no compaction, fragmentation is handled by the bins
//! - **Barrier discipline**: reference writes must go through
//!   `MemoryManager::store_ref` while a cycle may be in progress

// Core collector
pub mod gc;
pub mod config;
pub mod error;

// Memory layout
pub mod allocator;
pub mod heap;
pub mod index;
pub mod memory;
pub mod object;

// Marking
pub mod marker;

// Observability
pub mod logging;
pub mod stats;

pub use allocator::{BlockAllocator, HugeItemAllocator};
pub use config::{ConfigError, MmConfig};
pub use error::{MmError, Result};
pub use gc::GcState;
pub use heap::{ChunkSource, Heap, HeapRef, MemorySegment, MmapChunkSource, Space};
pub use logging::{GcEvent, GcLogger, GcLoggerConfig, LogLevel};
pub use marker::{ExecutionStack, MarkStack, PersistentId};
pub use memory::MemoryManager;
pub use object::{ObjectMut, ObjectRef, VTable, WeakKind, MEMBER_DATA_VTABLE};
pub use stats::{CollectorStats, MemoryStatistics, PauseSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
