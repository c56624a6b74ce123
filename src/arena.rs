/*
    TrackFlux

    Copyright 2026

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Bump-pointer arena for transient derived tables (spec §4.7).
//!
//! No teacher file needs anything like this (fluxfox runs on a heap-backed host and just
//! allocates `Vec`s), so this is new ambient surface sized for the firmware hosts spec §4.7
//! describes: "single bump-pointer region between `_ebss` and the top of SRAM ... no free ...
//! asserts on overflow". The shape — wrap a caller-supplied `&mut [u8]`, bump a cursor, hand back
//! sub-slices — follows the same "caller owns the backing storage, we only manage offsets into
//! it" discipline [`crate::ring::SpscRing`] uses for its backing buffer.

use bytemuck::Pod;

use crate::error::{Result, TrackEngineError};

/// A single-region bump allocator over caller-owned storage. Allocations are never freed
/// individually; the whole arena is reclaimed at once via [`Arena::reset`].
pub struct Arena<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> Arena<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Arena { buf, pos: 0 }
    }

    /// Bytes allocated so far.
    pub fn used(&self) -> usize {
        self.pos
    }

    /// Bytes remaining in the region.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Reclaim the entire arena. Any previously handed-out slices must no longer be in use;
    /// nothing enforces this at the type level, matching spec §4.7's "no free" model where the
    /// hosting layer resets the region wholesale between uses rather than tracking individual
    /// allocation lifetimes.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    /// Allocate `len` bytes, 4-byte aligned (spec §4.7), returning a mutable view into the arena.
    pub fn alloc_bytes(&mut self, len: usize) -> Result<&mut [u8]> {
        let aligned = (self.pos + 3) & !3;
        let end = aligned
            .checked_add(len)
            .ok_or(TrackEngineError::Overflow("arena allocation size overflowed"))?;
        if end > self.buf.len() {
            return Err(TrackEngineError::Overflow("arena region exhausted"));
        }
        self.pos = end;
        Ok(&mut self.buf[aligned..end])
    }

    /// Allocate storage for `n` copies of a [`Pod`] type, zero-initialized, and return it as a
    /// typed slice. Used to build a transient, filtered copy of a type table (spec §4.7: "ST host
    /// builds a filtered copy of the default IMG table").
    pub fn alloc_array<T: Pod>(&mut self, n: usize) -> Result<&mut [T]> {
        let byte_len = n
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(TrackEngineError::Overflow("arena array size overflowed"))?;
        let bytes = self.alloc_bytes(byte_len)?;
        bytemuck::try_cast_slice_mut(bytes)
            .map_err(|_| TrackEngineError::Overflow("arena array alignment mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_table::RawEntry;

    #[test]
    fn alloc_bytes_advances_past_previous_allocation() {
        let mut storage = [0u8; 32];
        let mut arena = Arena::new(&mut storage);
        let first = arena.alloc_bytes(5).unwrap();
        first.copy_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(arena.used(), 5);
        let second = arena.alloc_bytes(4).unwrap();
        assert_eq!(second.len(), 4);
        assert_eq!(arena.used(), 12); // 5 rounded up to 8, plus 4
    }

    #[test]
    fn overflowing_the_region_is_rejected() {
        let mut storage = [0u8; 8];
        let mut arena = Arena::new(&mut storage);
        assert!(arena.alloc_bytes(4).is_ok());
        assert!(arena.alloc_bytes(8).is_err());
    }

    #[test]
    fn reset_reclaims_the_whole_region() {
        let mut storage = [0u8; 16];
        let mut arena = Arena::new(&mut storage);
        arena.alloc_bytes(16).unwrap();
        assert_eq!(arena.remaining(), 0);
        arena.reset();
        assert_eq!(arena.remaining(), 16);
    }

    #[test]
    fn builds_a_filtered_copy_of_the_default_table() {
        let mut storage = [0u8; 256];
        let mut arena = Arena::new(&mut storage);
        let filtered: &mut [RawEntry] = arena.alloc_array(2).unwrap();
        filtered.copy_from_slice(&crate::type_table::DEFAULT_TABLE[..2]);
        assert_eq!(filtered[0].nr_secs(), crate::type_table::DEFAULT_TABLE[0].nr_secs());
    }
}
