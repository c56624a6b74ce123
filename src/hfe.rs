//! The HFE (pre-encoded bitstream) engine (spec §4.6).
//!
//! Grounded directly on the teacher crate's `file_parsers/hfe.rs`: the same 26-byte little-endian
//! header layout (`HfeFileHeader`) and 4-byte track index entry (`HfeTrackIndexEntry`) read via
//! `binrw`, and the same const-evaluated bit-reversal table (`REVERSE_TABLE`/`reverse_bits`) used
//! there to un-reverse bytes read off the wire. The teacher only ever *decodes* a whole HFE image
//! into a `DiskImage` up front; this module additionally runs the live read/write/flux-generation
//! state machine spec §4.6 describes, which has no teacher counterpart.

use bit_vec::BitVec;
use binrw::{binrw, BinRead};

use crate::clock::Clock;
use crate::error::{Result, TrackEngineError};
use crate::io_handle::FileHandle;
use crate::random::RandomSource;
use crate::ring::SpscRing;

pub const MAGIC_V3: &[u8; 8] = b"HXCHFEV3";
pub const MAGIC_V1: &[u8; 8] = b"HXCPICFE";

/// Bound on the HFE v3 `index` opcode's recorded pulse timestamps.
pub const MAX_CUSTOM_PULSES: usize = 16;

const fn reverse_bits(mut byte: u8) -> u8 {
    byte = (byte >> 4) | (byte << 4);
    byte = ((byte & 0x33) << 2) | ((byte & 0xCC) >> 2);
    byte = ((byte & 0x55) << 1) | ((byte & 0xAA) >> 1);
    byte
}

const fn generate_reverse_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = reverse_bits(i as u8);
        i += 1;
    }
    table
}

/// Bit-reversal lookup, used both to un-reverse incoming write bits (spec §4.6: "bits are written
/// bit-reversed") and to pick out the `skip` opcode's operand bit count.
pub const REVERSE_TABLE: [u8; 256] = generate_reverse_table();

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct HfeFileHeader {
    signature: [u8; 8],
    format_revision: u8,
    nr_tracks: u8,
    nr_sides: u8,
    track_encoding: u8,
    bitrate: u16,
    rpm: u16,
    interface_mode: u8,
    _unused: u8,
    track_list_offset: u16,
    write_allowed: u8,
    single_step: u8,
    _track0s0_altencoding: u8,
    _track0s0_encoding: u8,
    _track0s1_altencoding: u8,
    _track0s1_encoding: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct HfeTrackIndexEntry {
    offset: u16,
    len: u16,
}

/// Opcode high-nibble values recognized when `is_v3` and a byte's low nibble is `0xF` at a byte
/// boundary (spec §4.6).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Opcode {
    Nop,
    Index,
    Bitrate,
    Skip,
    Rand,
}

impl Opcode {
    fn from_high_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0x0 => Some(Opcode::Nop),
            0x8 => Some(Opcode::Index),
            0x4 => Some(Opcode::Bitrate),
            0xC => Some(Opcode::Skip),
            0x2 => Some(Opcode::Rand),
            _ => None,
        }
    }
}

/// A pre-encoded bitstream block: the open HFE file's static parameters plus the live position
/// and flux-generation state the engine advances on each call (spec §4.6, §3).
pub struct HfeBlock {
    pub is_v3: bool,
    pub nr_tracks: u8,
    pub nr_sides: u8,
    pub bitrate_khz: u16,
    pub double_step: bool,
    pub write_allowed: bool,
    track_list_offset: u16,

    pub write_bc_ticks: u32,
    pub ticks_per_cell: u32,
    sysclk_us_2: u32,

    track_base_off: u64,
    pub trk_len: u32,
    pub tracklen_bc: u32,
    pub stk_per_rev: u64,
    trk_pos: u32,

    pub cur_bc: u32,
    pub cur_ticks: u64,
    pub tracklen_ticks: u64,
    pub version: u32,
    index_pulses: [u64; MAX_CUSTOM_PULSES],
    next_index_pulses_pos: usize,
    bits_since_flux: u32,
    pending_skip_bits: u8,

    batch_secs: u8,

    write_window: Vec<u8>,
    write_window_base_block: u64,
    write_window_loaded: bool,
    write_window_dirty: bool,
    write_pos_in_window: usize,
    pub wrapped: bool,

    /// One bit per bitcell of the current track, set wherever the `rand` opcode substituted
    /// pseudo-random data for an uncertain bit (spec §4.6 "Opcodes (v3 only)": `rand`). A
    /// controller re-reading the same physical sector sees different bits at these positions on
    /// each pass, exactly as it would over a real weak/flaky sector.
    pub weak_mask: BitVec,
}

impl HfeBlock {
    /// Open an HFE image: read the 64-byte header and derive the bitcell-timing constants that
    /// hold for the whole file (spec §4.6 "Open").
    pub fn open(file: &mut dyn FileHandle, clock: &dyn Clock) -> Result<Self> {
        file.seek(0)?;
        let mut raw = [0u8; 26];
        file.read(&mut raw)?;
        let header = HfeFileHeader::read(&mut std::io::Cursor::new(raw))?;

        let is_v3 = header.signature == *MAGIC_V3 && header.format_revision == 0;
        let is_v1 = header.signature == *MAGIC_V1 && header.format_revision <= 1;
        if !is_v3 && !is_v1 {
            return Err(TrackEngineError::FormatReject);
        }
        if header.bitrate == 0 || !(1..=2).contains(&header.nr_sides) {
            return Err(TrackEngineError::InvalidGeometry("HFE header fields out of range"));
        }

        let write_bc_ticks = (clock.sysclk_us(500) / header.bitrate as u64) as u32;
        let ticks_per_cell = 16 * write_bc_ticks;
        let batch_secs = if write_bc_ticks as u64 > clock.sysclk_ns(1500) { 2 } else { 8 };

        Ok(HfeBlock {
            is_v3,
            nr_tracks: header.nr_tracks,
            nr_sides: header.nr_sides,
            bitrate_khz: header.bitrate,
            double_step: header.single_step == 0x00,
            write_allowed: header.write_allowed == 0x00,
            track_list_offset: header.track_list_offset,
            write_bc_ticks,
            ticks_per_cell,
            sysclk_us_2: clock.sysclk_us(2) as u32,
            track_base_off: 0,
            trk_len: 0,
            tracklen_bc: 0,
            stk_per_rev: 0,
            trk_pos: 0,
            cur_bc: 0,
            cur_ticks: 0,
            tracklen_ticks: 0,
            version: 0,
            index_pulses: [0; MAX_CUSTOM_PULSES],
            next_index_pulses_pos: 0,
            bits_since_flux: 0,
            pending_skip_bits: 0,
            batch_secs,
            write_window: Vec::new(),
            write_window_base_block: 0,
            write_window_loaded: false,
            write_window_dirty: false,
            write_pos_in_window: 0,
            wrapped: false,
            weak_mask: BitVec::new(),
        })
    }

    /// Seek to a (linear) track, reading its 4-byte `{offset, len}` entry from the TLUT (spec
    /// §4.6 "Track seek").
    pub fn seek_track(&mut self, file: &mut dyn FileHandle, track: u16) -> Result<()> {
        let entry_off = self.track_list_offset as u64 * 512 + (track / 2) as u64 * 4;
        file.seek(entry_off)?;
        let mut raw = [0u8; 4];
        file.read(&mut raw)?;
        let entry = HfeTrackIndexEntry::read(&mut std::io::Cursor::new(raw))?;

        self.track_base_off = entry.offset as u64 * 512;
        self.trk_len = entry.len as u32 / 2;
        self.tracklen_bc = self.trk_len * 8;
        let total_ticks = self.ticks_per_cell as u64 * self.tracklen_bc as u64 / 16;
        self.stk_per_rev = total_ticks;

        self.trk_pos = 0;
        self.cur_bc = 0;
        self.cur_ticks = 0;
        self.bits_since_flux = 0;
        self.pending_skip_bits = 0;
        self.write_window_loaded = false;
        self.write_window_dirty = false;
        self.wrapped = false;
        self.weak_mask = BitVec::from_elem(self.tracklen_bc as usize, false);
        Ok(())
    }

    /// Fill `read_bc` with raw bitcell bytes for the given head, one 512-byte file block (both
    /// heads' 256-byte halves) at a time (spec §4.6 "Read"). `batch_secs` still governs the
    /// write-path's dirty-window size; reading one block per call rather than accumulating a
    /// `batch_secs`-sized batch buffer produces the same `read_bc` contents and the same
    /// `trk_pos` advancement, just with smaller, more frequent file reads.
    pub fn read_track(&mut self, file: &mut dyn FileHandle, head: u8, read_bc: &SpscRing<u8>) -> Result<()> {
        while read_bc.free() >= 256 && self.trk_len > 0 {
            if self.trk_pos >= self.trk_len {
                self.trk_pos = 0;
            }
            let block_off = self.track_base_off + self.trk_pos as u64 * 512;
            let mut block = [0u8; 512];
            file.seek(block_off)?;
            file.read(&mut block)?;
            let half = if head & 1 == 0 { &block[..256] } else { &block[256..] };
            read_bc.push_slice(half);
            self.trk_pos += 1;
        }
        Ok(())
    }

    fn emit_bits(&mut self, byte: u8, nbits: u8, out: &SpscRing<u32>, weak: bool) {
        let mut byte = byte;
        for _ in 0..nbits {
            let bit = byte & 1;
            byte >>= 1;
            self.bits_since_flux += 1;
            if bit == 1 {
                let interval = self.ticks_per_cell * self.bits_since_flux;
                out.push(interval);
                self.cur_ticks += interval as u64;
                self.bits_since_flux = 0;
            }
            if weak && (self.cur_bc as usize) < self.weak_mask.len() {
                self.weak_mask.set(self.cur_bc as usize, true);
            }
            self.cur_bc += 1;
            if self.cur_bc >= self.tracklen_bc {
                if self.cur_ticks != self.tracklen_ticks {
                    self.version += 1;
                }
                self.tracklen_ticks = self.cur_ticks;
                self.cur_bc = 0;
                self.cur_ticks = 0;
            }
        }
    }

    fn handle_opcode<R: RandomSource>(
        &mut self,
        byte: u8,
        read_bc: &SpscRing<u8>,
        rng: &mut R,
        out: &SpscRing<u32>,
    ) {
        let op = match Opcode::from_high_nibble(byte >> 4) {
            Some(op) => op,
            None => return,
        };
        match op {
            Opcode::Nop => {}
            Opcode::Index => {
                if self.next_index_pulses_pos < MAX_CUSTOM_PULSES {
                    let val = self.cur_ticks;
                    if self.index_pulses[self.next_index_pulses_pos] != val {
                        self.version += 1;
                    }
                    self.index_pulses[self.next_index_pulses_pos] = val;
                    self.next_index_pulses_pos += 1;
                }
            }
            Opcode::Bitrate => {
                if let Some(x) = read_bc.pop() {
                    self.ticks_per_cell = self.sysclk_us_2 * 16 * x as u32 / 72;
                }
            }
            Opcode::Skip => {
                if let Some(x) = read_bc.pop() {
                    self.pending_skip_bits = REVERSE_TABLE[x as usize] & 7;
                }
            }
            Opcode::Rand => {
                let random_byte = rng.next_byte();
                self.emit_bits(random_byte, 8, out, true);
            }
        }
    }

    /// Consume `read_bc` byte by byte, emitting flux intervals into `out` (spec §4.6 "Flux
    /// generation"). `rng` backs the `rand` opcode's substituted data.
    pub fn rdata_flux<R: RandomSource>(&mut self, read_bc: &SpscRing<u8>, out: &SpscRing<u32>, rng: &mut R) {
        while let Some(byte) = read_bc.pop() {
            if self.is_v3 && self.pending_skip_bits == 0 && byte & 0x0F == 0x0F {
                self.handle_opcode(byte, read_bc, rng, out);
                continue;
            }
            let drop = self.pending_skip_bits.min(8);
            self.pending_skip_bits -= drop;
            self.emit_bits(byte >> drop, 8 - drop, out, false);
        }
    }

    fn ensure_window_loaded(&mut self, file: &mut dyn FileHandle, block: u64) -> Result<()> {
        let window_block = block - block % self.batch_secs as u64;
        if self.write_window_loaded && window_block == self.write_window_base_block {
            return Ok(());
        }
        self.flush_window(file)?;
        let len = self.batch_secs as usize * 512;
        let mut buf = vec![0u8; len];
        file.seek(window_block * 512)?;
        file.read(&mut buf)?;
        self.write_window = buf;
        self.write_window_base_block = window_block;
        self.write_window_loaded = true;
        self.write_window_dirty = false;
        Ok(())
    }

    fn flush_window(&mut self, file: &mut dyn FileHandle) -> Result<()> {
        if self.write_window_loaded && self.write_window_dirty {
            file.seek(self.write_window_base_block * 512)?;
            file.write(&self.write_window)?;
            self.write_window_dirty = false;
        }
        Ok(())
    }

    /// Decode incoming raw bits from `write_bc` and commit them into the track's dirty batch
    /// window, preserving non-`rand` v3 opcodes byte-for-byte (spec §4.6 "Write").
    pub fn write_track(&mut self, file: &mut dyn FileHandle, head: u8, write_bc: &SpscRing<u8>) -> Result<()> {
        while let Some(raw) = write_bc.pop() {
            let byte = REVERSE_TABLE[raw as usize];
            if self.trk_pos >= self.trk_len {
                self.trk_pos = 0;
                self.wrapped = true;
            }
            let block = self.track_base_off / 512 + self.trk_pos as u64;
            self.ensure_window_loaded(file, block)?;

            let half_start = if head & 1 == 0 { 0 } else { 256 };
            let window_offset = (block - self.write_window_base_block) as usize * 512
                + half_start
                + self.write_pos_in_window;

            let existing = self.write_window[window_offset];
            let keep_opcode = self.is_v3
                && existing & 0x0F == 0x0F
                && matches!(Opcode::from_high_nibble(existing >> 4), Some(op) if op != Opcode::Rand);
            self.write_window[window_offset] = if keep_opcode { existing } else { byte };
            self.write_window_dirty = true;

            self.write_pos_in_window += 1;
            if self.write_pos_in_window >= 256 {
                self.write_pos_in_window = 0;
                self.trk_pos += 1;
            }
        }
        Ok(())
    }

    /// Flush any dirty write-window contents to disk. Callers invoke this on track change and on
    /// explicit sync (spec §4.6: "on advancing past the window's end or on flush, write back").
    pub fn flush(&mut self, file: &mut dyn FileHandle) -> Result<()> {
        self.flush_window(file)
    }
}
