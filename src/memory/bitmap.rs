//! Bit-per-frame storage
//!
//! Frame `i` lives in byte `i / 8`, bit `i % 8` (least significant first).
//! A set bit means the frame is unavailable.

use core::ops::Range;

use crate::constants::memory::{BITS_PER_BYTE, FULL_BITMAP_BYTE};

/// A bitmap over borrowed storage
pub struct Bitmap<'a> {
    bytes: &'a mut [u8],
}

impl<'a> Bitmap<'a> {
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Number of bits the storage holds.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.bytes.len() * BITS_PER_BYTE
    }

    pub fn size_in_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Marks every bit unavailable.
    pub fn fill(&mut self) {
        self.bytes.fill(FULL_BITMAP_BYTE);
    }

    /// Check if the bit at `index` is set. Panics if `index` is out of range.
    pub fn test(&self, index: usize) -> bool {
        let (byte, mask) = Self::locate(index);
        self.bytes[byte] & mask != 0
    }

    /// set a bit (1). Returns whether it was clear before.
    pub fn set(&mut self, index: usize) -> bool {
        let (byte, mask) = Self::locate(index);
        let was_clear = self.bytes[byte] & mask == 0;
        self.bytes[byte] |= mask;
        was_clear
    }

    /// clear a bit (0). Returns whether it was set before.
    pub fn clear(&mut self, index: usize) -> bool {
        let (byte, mask) = Self::locate(index);
        let was_set = self.bytes[byte] & mask != 0;
        self.bytes[byte] &= !mask;
        was_set
    }

    /// Sets every bit in `range`, returning how many were clear.
    pub fn set_range(&mut self, range: Range<usize>) -> usize {
        range.filter(|&i| self.set(i)).count()
    }

    /// Clears every bit in `range`, returning how many were set.
    pub fn clear_range(&mut self, range: Range<usize>) -> usize {
        range.filter(|&i| self.clear(i)).count()
    }

    /// First index in `range` whose bit is clear.
    pub fn first_clear_in(&self, mut range: Range<usize>) -> Option<usize> {
        range.find(|&i| !self.test(i))
    }

    #[cfg(test)]
    fn first_set_in(&self, mut range: Range<usize>) -> Option<usize> {
        range.find(|&i| self.test(i))
    }

    #[cfg(test)]
    fn count_clear(&self) -> usize {
        self.bytes.iter().map(|b| b.count_zeros() as usize).sum()
    }

    fn locate(index: usize) -> (usize, u8) {
        (index / BITS_PER_BYTE, 1 << (index % BITS_PER_BYTE))
    }
}
