//! Slot Bitmap - Per-Chunk Side Tables
//!
//! Every chunk keeps three bitmaps with one bit per slot:
//!
//! ```text
//! object  : 1 where an object starts
//! extends : 1 on every slot after the first slot of an object
//! black   : 1 on object starts marked in the current cycle
//!
//! slot      0 1 2 3 4 5 6 7
//! object    1 0 0 1 0 1 0 0
//! extends   0 1 1 0 0 0 1 0
//!
//! objects: 0..3, 3..4, 5..7   free: 4, 7
//! ```
//!
//! A slot is free when neither its object nor its extends bit is set.

use super::AVAILABLE_SLOTS;

const WORDS: usize = AVAILABLE_SLOTS / 64;

/// Fixed-size bitmap covering the slots of one chunk
#[derive(Clone, PartialEq, Eq)]
pub struct SlotBitmap {
    words: [u64; WORDS],
}

impl SlotBitmap {
    /// Create a bitmap with every bit cleared
    pub const fn new() -> Self {
        Self { words: [0; WORDS] }
    }

    #[inline]
    pub fn get(&self, slot: usize) -> bool {
        self.words[slot / 64] & (1u64 << (slot % 64)) != 0
    }

    #[inline]
    pub fn set(&mut self, slot: usize) {
        self.words[slot / 64] |= 1u64 << (slot % 64);
    }

    #[inline]
    pub fn clear(&mut self, slot: usize) {
        self.words[slot / 64] &= !(1u64 << (slot % 64));
    }

    /// Set bits `[start, start + len)`
    pub fn set_range(&mut self, start: usize, len: usize) {
        for slot in start..start + len {
            self.set(slot);
        }
    }

    /// Clear bits `[start, start + len)`
    pub fn clear_range(&mut self, start: usize, len: usize) {
        for slot in start..start + len {
            self.clear(slot);
        }
    }

    pub fn clear_all(&mut self) {
        self.words = [0; WORDS];
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Number of slots set in either bitmap
    pub fn count_union(&self, other: &SlotBitmap) -> usize {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a | b).count_ones() as usize)
            .sum()
    }

    pub fn is_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// First set bit at or after `from`
    pub fn next_set(&self, from: usize) -> Option<usize> {
        if from >= AVAILABLE_SLOTS {
            return None;
        }

        let mut word_idx = from / 64;
        let mut word = self.words[word_idx] & (!0u64 << (from % 64));
        loop {
            if word != 0 {
                return Some(word_idx * 64 + word.trailing_zeros() as usize);
            }
            word_idx += 1;
            if word_idx == WORDS {
                return None;
            }
            word = self.words[word_idx];
        }
    }

    /// Iterate the indices of all set bits in ascending order
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.next_set(0);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.next_set(current + 1);
            Some(current)
        })
    }

    /// Length of the run of set bits starting at `start`
    pub fn run_length(&self, start: usize) -> usize {
        let mut len = 0;
        while start + len < AVAILABLE_SLOTS && self.get(start + len) {
            len += 1;
        }
        len
    }
}

impl Default for SlotBitmap {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SlotBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotBitmap")
            .field("ones", &self.count_ones())
            .finish()
    }
}
