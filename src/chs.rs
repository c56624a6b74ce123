//! Cylinder/head/sector geometry types.
//!
//! Grounded on the teacher crate's `DiskChs`/`DiskChsn` (src/chs.rs): a plain value type with
//! `c()`/`h()`/`s()` accessors and an LBA conversion, generalized here with the sector-size-code
//! helpers from [`crate::n_to_bytes`]/[`crate::bytes_to_n`].

use std::fmt::{Display, Formatter};

use crate::n_to_bytes;

/// A sector size code `n`, where the sector payload is `128 * 2^n` bytes.
pub type SectorSizeCode = u8;

/// Cylinder/head/sector address, 1-indexed sectors (matching IBM System 34 sector numbering).
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct Chs {
    c: u16,
    h: u8,
    s: u8,
}

impl Default for Chs {
    fn default() -> Self {
        Self { c: 0, h: 0, s: 1 }
    }
}

impl From<(u16, u8, u8)> for Chs {
    fn from((c, h, s): (u16, u8, u8)) -> Self {
        Self { c, h, s }
    }
}

impl From<Chs> for (u16, u8, u8) {
    fn from(chs: Chs) -> Self {
        (chs.c, chs.h, chs.s)
    }
}

impl Display for Chs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{} s:{}]", self.c, self.h, self.s)
    }
}

impl Chs {
    pub fn new(c: u16, h: u8, s: u8) -> Self {
        Self { c, h, s }
    }

    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }
    pub fn s(&self) -> u8 {
        self.s
    }

    /// Linear track index `cyl*nr_sides + head`, used to index the image handle's current-track
    /// state (spec §3: `cur_track = cyl*2 + side`).
    pub fn track_index(&self, nr_sides: u8) -> usize {
        self.c as usize * nr_sides as usize + self.h as usize
    }
}

/// Cylinder/head pair, without a sector component. Used to address a whole track.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, Default)]
pub struct Ch {
    c: u16,
    h: u8,
}

impl From<(u16, u8)> for Ch {
    fn from((c, h): (u16, u8)) -> Self {
        Self { c, h }
    }
}

impl From<Chs> for Ch {
    fn from(chs: Chs) -> Self {
        Self { c: chs.c, h: chs.h }
    }
}

impl Display for Ch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[c:{} h:{}]", self.c, self.h)
    }
}

impl Ch {
    pub fn new(c: u16, h: u8) -> Self {
        Self { c, h }
    }
    pub fn c(&self) -> u16 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h
    }

    pub fn track_index(&self, nr_sides: u8) -> usize {
        self.c as usize * nr_sides as usize + self.h as usize
    }
}

/// A CHS address plus a sector-size code, sufficient to describe an on-disk sector header
/// (IDAM fields: cylinder, head, sector, size-code).
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct Chsn {
    chs: Chs,
    n: SectorSizeCode,
}

impl Chsn {
    pub fn new(c: u16, h: u8, s: u8, n: SectorSizeCode) -> Self {
        Self { chs: Chs::new(c, h, s), n }
    }

    pub fn c(&self) -> u16 {
        self.chs.c()
    }
    pub fn h(&self) -> u8 {
        self.chs.h()
    }
    pub fn s(&self) -> u8 {
        self.chs.s()
    }
    pub fn n(&self) -> SectorSizeCode {
        self.n
    }
    pub fn chs(&self) -> Chs {
        self.chs
    }

    /// Sector payload size in bytes, per `n_to_bytes`.
    pub fn size(&self) -> usize {
        n_to_bytes(self.n)
    }
}
