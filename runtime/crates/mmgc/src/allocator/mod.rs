//! Allocator Module - Slot and Segment Allocation
//!
//! Manages the two allocation strategies of the managed heap.
//!
//! ## Allocation Strategies
//!
//! - **Block Allocation**: bump pointer within the current chunk, then
//!   segregated free bins rebuilt at every sweep
//! - **Huge Item Allocation**: one dedicated, page-rounded segment per object
//!
//! ## Size Classes
//!
//! - Block: up to `DATA_SIZE` (64 KiB), rounded to 32-byte slots
//! - Huge: anything larger
//!
//! ## Free Bins
//!
//! ```text
//! bin:    1    2    3    4    5    6    7+
//!        [1]  [2]  [3]  [4]  [5]  [6]  [>=7, first fit]
//! ```

pub mod block;
pub mod huge;

pub use block::{BlockAllocator, BlockSweep, ChunkId, FreeRun};
pub use huge::{HugeChunk, HugeId, HugeItemAllocator, HugeSweep};
