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

//! # trackflux
//!
//! `trackflux` is the track-level engine of a floppy-drive emulator. Given an open disk image
//! file and a requested (cylinder, head) position, it synthesizes a continuous stream of flux
//! transitions as if a physical medium were spinning under a read/write head, and in the other
//! direction, decodes an incoming stream of raw bitcells from a host controller back into sector
//! data committed to the image.
//!
//! Two image families are supported:
//!
//! - **Sector images** ([`img`]) — a flat array of logical sector payloads. The engine
//!   synthesizes the full on-track bitstream (gaps, sync, address marks, CRCs) in MFM or FM
//!   encoding, and inversely recovers sectors from a host-generated bitstream.
//! - **Pre-encoded images** ([`hfe`]) — a block layout that already contains raw bitcells at a
//!   declared bitrate, interspersed with HxC-style opcode bytes.
//!
//! The top-level entry point is [`image::ImageHandle`].

pub mod arena;
pub mod chs;
pub mod clock;
pub mod codec;
pub mod config;
pub mod crc;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod headers;
pub mod hfe;
pub mod host;
pub mod image;
pub mod img;
pub mod io_handle;
pub mod random;
pub mod ring;
pub mod sector_map;
pub mod type_table;

pub use chs::{Chs, SectorSizeCode};
pub use clock::{Clock, Ticks};
pub use error::TrackEngineError;
pub use host::HostProfile;
pub use image::ImageHandle;
pub use io_handle::FileHandle;

/// Maximum number of sectors a single track's rotational map may hold. Bounds `sec_map` storage
/// so the engine never needs a heap allocation per track change.
pub const MAX_SEC_MAP: usize = 36;

/// Default sector payload size in bytes, corresponding to `sec_no` (sector size code) 2.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Upper bound on a single sector's payload, matching `sec_no` (sector size code) 6.
pub const MAXIMUM_SECTOR_SIZE: usize = 8192;

/// The synchronization/codec mode of a track's bitstream.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SyncMode {
    /// Modified Frequency Modulation: double or high density PC-compatible encoding.
    #[default]
    Mfm,
    /// Frequency Modulation: single density encoding used by 8" and early 5.25" media.
    Fm,
    /// No codec involvement; bitcells are already encoded in the image (HFE).
    None,
}

/// Convert a sector size code `n` (128 * 2^n bytes) to a byte count, capped at
/// [`MAXIMUM_SECTOR_SIZE`].
pub const fn n_to_bytes(n: u8) -> usize {
    let shifted = 128usize.wrapping_shl(n as u32);
    if shifted > MAXIMUM_SECTOR_SIZE || shifted == 0 {
        MAXIMUM_SECTOR_SIZE
    } else {
        shifted
    }
}

/// Convert a byte count to the smallest sector size code `n` with `n_to_bytes(n) >= size`.
pub const fn bytes_to_n(size: usize) -> u8 {
    let mut n = 0u8;
    let mut cur = 128usize;
    while cur < size {
        cur <<= 1;
        n += 1;
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_to_bytes_roundtrips_common_sizes() {
        assert_eq!(n_to_bytes(0), 128);
        assert_eq!(n_to_bytes(2), 512);
        assert_eq!(n_to_bytes(3), 1024);
        assert_eq!(n_to_bytes(6), 8192);
        assert_eq!(n_to_bytes(7), MAXIMUM_SECTOR_SIZE);
    }

    #[test]
    fn bytes_to_n_is_inverse_of_n_to_bytes() {
        for n in 0..6u8 {
            assert_eq!(bytes_to_n(n_to_bytes(n)), n);
        }
    }
}
