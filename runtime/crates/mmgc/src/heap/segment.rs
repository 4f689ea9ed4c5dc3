//! Memory Segments - Raw Backing Storage
//!
//! A [`MemorySegment`] is one contiguous, zero-filled allocation handed out by a
//! [`ChunkSource`]. Block allocators carve a segment into slots; the huge item
//! allocator gives a whole segment to a single object.
//!
//! The default source, [`MmapChunkSource`], maps anonymous memory through
//! `memmap2`. Hosts embed the memory manager with their own source by
//! implementing the trait, for example to enforce a hard memory cap.

use crate::error::{MmError, Result};
use log::trace;
use memmap2::MmapMut;

/// Backing storage of a segment
#[derive(Debug)]
enum Backing {
    /// Anonymous memory mapping
    Mapped(MmapMut),
    /// Heap buffer supplied by a custom source
    Owned(Box<[u8]>),
}

/// One OS-backed allocation
///
/// Contents are zero-filled when the segment is created.
#[derive(Debug)]
pub struct MemorySegment {
    backing: Backing,
}

impl MemorySegment {
    /// Map an anonymous segment of `size` bytes
    pub fn map_anon(size: usize) -> Result<Self> {
        let map = MmapMut::map_anon(size)?;
        Ok(Self {
            backing: Backing::Mapped(map),
        })
    }

    /// Wrap an owned buffer
    ///
    /// The buffer is cleared so the zero-fill guarantee holds for every
    /// segment regardless of its source.
    pub fn from_boxed(mut buf: Box<[u8]>) -> Self {
        buf.fill(0);
        Self {
            backing: Backing::Owned(buf),
        }
    }

    /// Size in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        match &self.backing {
            Backing::Mapped(map) => &map[..],
            Backing::Owned(buf) => &buf[..],
        }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Mapped(map) => &mut map[..],
            Backing::Owned(buf) => &mut buf[..],
        }
    }
}

/// Supplier of memory segments
///
/// Allocators request one segment per chunk (`CHUNK_SIZE` bytes) and one per
/// huge object (page-rounded). A failing `allocate` during object allocation
/// is fatal for the memory manager.
pub trait ChunkSource {
    /// Allocate a zero-filled segment of exactly `size` bytes
    fn allocate(&mut self, size: usize) -> Result<MemorySegment>;

    /// Return a segment previously obtained from `allocate`
    fn free(&mut self, segment: MemorySegment);

    /// Bytes currently held by callers
    fn reserved_bytes(&self) -> usize;
}

/// Chunk source backed by anonymous memory mappings
///
/// # Examples
///
/// ```rust
/// use mmgc::heap::{ChunkSource, MmapChunkSource};
///
/// let mut source = MmapChunkSource::with_limit(64 * 1024);
/// let segment = source.allocate(64 * 1024).unwrap();
/// assert_eq!(source.reserved_bytes(), 64 * 1024);
///
/// // The cap is reached
/// assert!(source.allocate(4096).is_err());
///
/// source.free(segment);
/// assert_eq!(source.reserved_bytes(), 0);
/// ```
#[derive(Debug, Default)]
pub struct MmapChunkSource {
    reserved: usize,
    limit: Option<usize>,
}

impl MmapChunkSource {
    /// Create an unbounded source
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source that refuses to reserve more than `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self {
            reserved: 0,
            limit: Some(limit),
        }
    }
}

impl ChunkSource for MmapChunkSource {
    fn allocate(&mut self, size: usize) -> Result<MemorySegment> {
        if let Some(limit) = self.limit {
            if self.reserved.saturating_add(size) > limit {
                return Err(MmError::ChunkSourceExhausted {
                    requested: size,
                    reason: format!("limit of {} bytes reached", limit),
                });
            }
        }

        let segment = MemorySegment::map_anon(size)?;
        self.reserved += segment.len();
        trace!(target: "mmgc::alloc", "mapped segment of {} bytes", size);
        Ok(segment)
    }

    fn free(&mut self, segment: MemorySegment) {
        self.reserved = self.reserved.saturating_sub(segment.len());
        trace!(target: "mmgc::alloc", "unmapped segment of {} bytes", segment.len());
    }

    fn reserved_bytes(&self) -> usize {
        self.reserved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapped_segment_is_zeroed() {
        let segment = MemorySegment::map_anon(8192).unwrap();
        assert_eq!(segment.len(), 8192);
        assert!(segment.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_owned_segment_is_cleared() {
        let segment = MemorySegment::from_boxed(vec![0xAA; 64].into_boxed_slice());
        assert!(segment.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_limit_reports_exhaustion() {
        let mut source = MmapChunkSource::with_limit(4096);
        let err = source.allocate(8192).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(source.reserved_bytes(), 0);
    }
}
