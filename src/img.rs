//! The IMG (sector-image) track state machine (spec §3 "IMG block", §4.5).
//!
//! This is the module with the least direct teacher precedent: fluxfox materializes an entire
//! track's `BitVec` up front via `structure_parsers::system34::write_track` and never needs to
//! resume mid-emission. The phase enumeration and resumable, ring-buffer-bounded emission loop
//! here are grounded directly on the spec's own pseudocode (§4.5); what *is* carried over from the
//! teacher is the vocabulary — `GAP_BYTE`, `IDAM_MARKER_BYTES`, `DAM_MARKER_BYTES` in
//! `structure_parsers::system34` name exactly the same bytes this module emits — and the
//! discipline of running CRC16 state threaded across field boundaries as plain struct fields
//! rather than recomputed from scratch each time.

use crate::chs::SectorSizeCode;
use crate::codec::{fm, mfm, TrackCodec};
use crate::crc::Crc16;
use crate::error::Result;
use crate::geometry::{self, Geometry};
use crate::io_handle::FileHandle;
use crate::n_to_bytes;
use crate::ring::SpscRing;
use crate::sector_map::{self, Layout};
use crate::{SyncMode, MAX_SEC_MAP};

const MFM_GAP_BYTE: u8 = 0x4E;
const FM_GAP_BYTE: u8 = 0xFF;

/// Enumerates the fixed phase order a revolution steps through (spec §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PhaseKind {
    Index,
    Idam(usize),
    DamPre(usize),
    Data(usize),
    DamPost(usize),
    Gap4,
}

fn phase_kind(decode_pos: u32, nr_sectors: u16) -> PhaseKind {
    let last = 4 * nr_sectors as u32 + 1;
    if decode_pos == 0 {
        PhaseKind::Index
    } else if decode_pos >= last {
        PhaseKind::Gap4
    } else {
        let rel = decode_pos - 1;
        let sector_i = (rel / 4) as usize;
        match rel % 4 {
            0 => PhaseKind::Idam(sector_i),
            1 => PhaseKind::DamPre(sector_i),
            2 => PhaseKind::Data(sector_i),
            _ => PhaseKind::DamPost(sector_i),
        }
    }
}

/// State a partial IDAM/DAM scan is left in between [`ImgBlock::write_track`] calls (spec §4.5
/// write path).
enum WriteState {
    Searching,
    /// MFM only: saw three `A1` sync words, waiting on the mark byte.
    AwaitingMark,
    CollectIdam(Vec<u8>),
    CollectDam(Vec<u8>),
}

/// The IMG block (spec §3): per-track derived geometry plus the position state the read/write
/// paths advance as ring-buffer space allows.
pub struct ImgBlock {
    pub sync: SyncMode,
    pub sec_size_code: SectorSizeCode,
    pub nr_sectors: u16,
    pub interleave: u8,
    pub skew: u8,
    pub skew_cyls_only: bool,
    pub has_iam: bool,
    pub post_crc_syncs: u8,
    pub base_off: u64,
    pub layout: Layout,
    pub sec_base: [u8; 2],
    pub sec_map: [u8; MAX_SEC_MAP],
    pub geometry: Geometry,

    cyl: u16,
    side: u8,
    nr_sides: u8,
    nr_cyls: u16,

    pub trk_off: u64,
    pub trk_sec: usize,
    pub decode_pos: u32,
    pub crc: Crc16,
    pub write_sector: i32,

    /// Tick the host's current write burst began at (spec §3's write-descriptor `{start_tick,
    /// bc_end}`), drained into here by the hosting [`crate::image::ImageHandle`] from its
    /// `write_descriptors` queue. Consulted only as the spec §4.5 point 4 fallback, when a DAM
    /// arrives with no locked IDAM.
    write_start_tick: Option<u32>,

    /// Already-encoded words of the current phase not yet drained into `read_bc`. Replaces the
    /// spec's `decode_data_pos` byte-offset counter with an equivalent leftover buffer: both give
    /// the same externally observable behavior (bounded progress per call, resumable mid-region),
    /// recorded as a deliberate simplification.
    pending: Vec<u16>,
    prev_low_bit: bool,

    write_state: WriteState,
    sync_run: u8,
}

#[allow(clippy::too_many_arguments)]
impl ImgBlock {
    pub fn new(
        sync: SyncMode,
        sec_size_code: SectorSizeCode,
        nr_sectors: u16,
        interleave: u8,
        skew: u8,
        skew_cyls_only: bool,
        has_iam: bool,
        post_crc_syncs: u8,
        base_off: u64,
        layout: Layout,
        inter_track_numbering: bool,
        base: u8,
        geometry: Geometry,
        nr_cyls: u16,
        nr_sides: u8,
    ) -> Self {
        let sec_base = sector_map::sector_bases(base, nr_sectors, inter_track_numbering);
        ImgBlock {
            sync,
            sec_size_code,
            nr_sectors,
            interleave,
            skew,
            skew_cyls_only,
            has_iam,
            post_crc_syncs,
            base_off,
            layout,
            sec_base,
            sec_map: [0; MAX_SEC_MAP],
            geometry,
            cyl: 0,
            side: 0,
            nr_sides,
            nr_cyls,
            trk_off: 0,
            trk_sec: 0,
            decode_pos: 0,
            crc: Crc16::new(),
            write_sector: -1,
            write_start_tick: None,
            pending: Vec::new(),
            prev_low_bit: false,
            write_state: WriteState::Searching,
            sync_run: 0,
        }
    }

    /// Recompute per-track state on a track change (spec §3, §5: "`cur_track`-derived state is
    /// recomputed on every track change"; "a track change ... abandons any mid-phase state").
    pub fn on_track_change(&mut self, cyl: u16, side: u8, trk_len: u64) {
        self.cyl = cyl;
        self.side = side;
        sector_map::build_sec_map(
            &mut self.sec_map,
            self.nr_sectors,
            self.interleave,
            self.skew,
            self.sec_base[side as usize & 1],
            self.skew_cyls_only,
            cyl,
            cyl * self.nr_sides as u16 + side as u16,
        );
        self.trk_off =
            sector_map::track_offset(self.layout, cyl, side, self.nr_sides, self.nr_cyls, trk_len, self.base_off);
        self.trk_sec = 0;
        self.decode_pos = 0;
        self.write_sector = -1;
        self.write_start_tick = None;
        self.pending.clear();
        self.prev_low_bit = false;
        self.write_state = WriteState::Searching;
        self.sync_run = 0;
    }

    /// Number of sides the underlying image was opened with (spec §3's `cur_track = cyl*2 +
    /// side` assumes this, generalized here to whatever the matched geometry reported).
    pub fn nr_sides(&self) -> u8 {
        self.nr_sides
    }

    /// Number of cylinders the underlying image was opened with, used by the hosting layer to
    /// pre-size a blank image (spec §6 handler vtable `extend`).
    pub fn nr_cyls(&self) -> u16 {
        self.nr_cyls
    }

    /// Record the tick at which the host's current write burst began (spec §3's write-descriptor
    /// `{start_tick, bc_end}`). Called by the hosting [`crate::image::ImageHandle`] as it drains
    /// its `write_descriptors` queue; consulted only by [`Self::infer_write_sector`].
    pub fn note_write_start(&mut self, start_tick: u32) {
        self.write_start_tick = Some(start_tick);
    }

    /// Fall back to a rotational-position estimate of the target sector when a DAM arrives with no
    /// preceding IDAM (spec §4.5 point 4): a format write lays a whole track down gap-by-gap
    /// rather than sector-by-sector, so there is never an IDAM to lock onto, only the tick at which
    /// the host began writing. `cur_ticks = cur_bc * ticks_per_cell / 16` (spec §3) inverts to a
    /// bitcell position, and 16 bitcells make a byte, so ticks divide out to a byte offset
    /// directly.
    fn infer_write_sector(&self) -> Option<i32> {
        let start_tick = self.write_start_tick? as u64;
        if self.geometry.ticks_per_cell == 0 {
            return None;
        }
        let sec_sz = n_to_bytes(self.sec_size_code) as u32;
        let enc_sec_sz = self.geometry.enc_sec_sz(sec_sz);
        if enc_sec_sz == 0 || self.nr_sectors == 0 {
            return None;
        }
        let byte_offset = (start_tick / self.geometry.ticks_per_cell as u64) as u32;
        let past_index = byte_offset.saturating_sub(self.geometry.idx_sz);
        let slot = (past_index / enc_sec_sz) as usize % self.nr_sectors as usize;
        let id = self.sec_map[slot];
        let base = self.sec_base[self.side as usize & 1];
        let local = id.wrapping_sub(base) as i32;
        if local < 0 || local as u16 >= self.nr_sectors {
            None
        } else {
            Some(local)
        }
    }

    fn gap_byte(&self) -> u8 {
        if matches!(self.sync, SyncMode::Fm) {
            FM_GAP_BYTE
        } else {
            MFM_GAP_BYTE
        }
    }

    fn push_raw<C: TrackCodec>(&mut self, codec: &C, out: &mut Vec<u16>, byte: u8) {
        let (word, carry) = codec.encode_byte(byte, self.prev_low_bit);
        out.push(word);
        self.prev_low_bit = carry;
    }

    fn push_sync_word(&mut self, out: &mut Vec<u16>, word: u16, carry: bool) {
        out.push(word);
        self.prev_low_bit = carry;
    }

    fn is_mfm(&self) -> bool {
        matches!(self.sync, SyncMode::Mfm)
    }

    fn generate_phase<C: TrackCodec>(
        &mut self,
        codec: &C,
        file: &mut dyn FileHandle,
        kind: PhaseKind,
    ) -> Result<Vec<u16>> {
        let mut out = Vec::new();
        let gap_byte = self.gap_byte();
        let is_mfm = self.is_mfm();
        match kind {
            PhaseKind::Index => {
                for _ in 0..self.geometry.gap_4a {
                    self.push_raw(codec, &mut out, gap_byte);
                }
                if self.has_iam {
                    if is_mfm {
                        for _ in 0..3 {
                            self.push_sync_word(&mut out, mfm::C2_SYNC_WORD, false);
                        }
                        self.push_raw(codec, &mut out, 0xFC);
                    } else {
                        let word = fm::fm_sync(0xFC, fm::FM_SYNC_CLK_IAM);
                        self.push_sync_word(&mut out, word, false);
                    }
                    for _ in 0..geometry::GAP_1 {
                        self.push_raw(codec, &mut out, gap_byte);
                    }
                }
            }
            PhaseKind::Idam(i) => {
                self.trk_sec = i;
                let id = self.sec_map[i];
                self.crc = Crc16::new();
                if is_mfm {
                    let presync = self.geometry.gap_3.min(geometry::GAP_SYNC);
                    for _ in 0..presync {
                        self.push_raw(codec, &mut out, 0x00);
                    }
                    for _ in 0..3 {
                        self.push_sync_word(&mut out, mfm::A1_SYNC_WORD, true);
                        self.crc.update(0xA1);
                    }
                    self.push_raw(codec, &mut out, 0xFE);
                    self.crc.update(0xFE);
                } else {
                    for _ in 0..geometry::FM_GAP_SYNC {
                        self.push_raw(codec, &mut out, 0x00);
                    }
                    let word = fm::fm_sync(0xFE, fm::FM_SYNC_CLK_DATA);
                    self.push_sync_word(&mut out, word, false);
                    self.crc.update(0xFE);
                }
                for b in [self.cyl as u8, self.side, id, self.sec_size_code] {
                    self.push_raw(codec, &mut out, b);
                    self.crc.update(b);
                }
                for b in self.crc.value().to_be_bytes() {
                    self.push_raw(codec, &mut out, b);
                }
                for _ in 0..self.geometry.gap_2 {
                    self.push_raw(codec, &mut out, gap_byte);
                }
                for _ in 0..self.post_crc_syncs {
                    self.push_raw(codec, &mut out, 0x00);
                }
            }
            PhaseKind::DamPre(_) => {
                self.crc = Crc16::new();
                if is_mfm {
                    for _ in 0..geometry::GAP_SYNC {
                        self.push_raw(codec, &mut out, 0x00);
                    }
                    for _ in 0..3 {
                        self.push_sync_word(&mut out, mfm::A1_SYNC_WORD, true);
                        self.crc.update(0xA1);
                    }
                    self.push_raw(codec, &mut out, 0xFB);
                    self.crc.update(0xFB);
                } else {
                    for _ in 0..geometry::FM_GAP_SYNC {
                        self.push_raw(codec, &mut out, 0x00);
                    }
                    let word = fm::fm_sync(0xFB, fm::FM_SYNC_CLK_DATA);
                    self.push_sync_word(&mut out, word, false);
                    self.crc.update(0xFB);
                }
            }
            PhaseKind::Data(i) => {
                let id = self.sec_map[i];
                let sec_sz = n_to_bytes(self.sec_size_code);
                let offset = sector_map::sector_payload_offset(
                    self.trk_off,
                    id,
                    self.sec_base[self.side as usize & 1],
                    self.sec_size_code,
                );
                let mut buf = vec![0u8; sec_sz];
                file.seek(offset)?;
                file.read(&mut buf)?;
                for b in &buf {
                    self.push_raw(codec, &mut out, *b);
                    self.crc.update(*b);
                }
            }
            PhaseKind::DamPost(_) => {
                for b in self.crc.value().to_be_bytes() {
                    self.push_raw(codec, &mut out, b);
                }
                for _ in 0..self.geometry.gap_3 {
                    self.push_raw(codec, &mut out, gap_byte);
                }
                for _ in 0..self.post_crc_syncs {
                    self.push_raw(codec, &mut out, 0x00);
                }
            }
            PhaseKind::Gap4 => {
                for _ in 0..self.geometry.gap_4 {
                    self.push_raw(codec, &mut out, gap_byte);
                }
            }
        }
        Ok(out)
    }

    /// Emit as much of the current revolution as `read_bc` has room for, then return (spec §4.5,
    /// §5: "make bounded progress ... then return").
    pub fn read_track<C: TrackCodec>(
        &mut self,
        codec: &C,
        file: &mut dyn FileHandle,
        read_bc: &SpscRing<u16>,
    ) -> Result<()> {
        loop {
            if self.pending.is_empty() {
                let last = 4 * self.nr_sectors as u32 + 1;
                if self.decode_pos > last {
                    self.decode_pos = 0;
                }
                let kind = phase_kind(self.decode_pos, self.nr_sectors);
                self.pending = self.generate_phase(codec, file, kind)?;
                if self.pending.is_empty() {
                    self.decode_pos += 1;
                    continue;
                }
            }
            let free = read_bc.free();
            if free == 0 {
                return Ok(());
            }
            let n = free.min(self.pending.len());
            let remainder = self.pending.split_off(n);
            read_bc.push_slice(&self.pending);
            self.pending = remainder;
            if self.pending.is_empty() {
                self.decode_pos += 1;
            } else {
                return Ok(());
            }
        }
    }

    fn address_mark_prefix(&self, mark: u8) -> Vec<u8> {
        if self.is_mfm() {
            vec![0xA1, 0xA1, 0xA1, mark]
        } else {
            vec![mark]
        }
    }

    fn begin_collect(&mut self, mark: u8) {
        let sec_sz = n_to_bytes(self.sec_size_code);
        self.write_state = match mark {
            0xFE => WriteState::CollectIdam(Vec::with_capacity(6)),
            0xFB => WriteState::CollectDam(Vec::with_capacity(sec_sz + 2)),
            _ => WriteState::Searching,
        };
    }

    fn handle_write_byte(&mut self, byte: u8, file: &mut dyn FileHandle) -> Result<()> {
        match &mut self.write_state {
            WriteState::AwaitingMark => {
                let mark = byte;
                self.begin_collect(mark);
            }
            WriteState::CollectIdam(buf) => {
                buf.push(byte);
                if buf.len() == 6 {
                    let buf = buf.clone();
                    self.finish_idam(&buf);
                }
            }
            WriteState::CollectDam(buf) => {
                buf.push(byte);
                let sec_sz = n_to_bytes(self.sec_size_code);
                if buf.len() == sec_sz + 2 {
                    let buf = buf.clone();
                    self.finish_dam(&buf, file)?;
                }
            }
            WriteState::Searching => {}
        }
        Ok(())
    }

    fn finish_idam(&mut self, buf: &[u8]) {
        let (cyl, hd, sec, n, crc_hi, crc_lo) = (buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]);
        let mut crc = Crc16::new();
        crc.update_slice(&self.address_mark_prefix(0xFE));
        crc.update_slice(&[cyl, hd, sec, n]);
        self.write_state = WriteState::Searching;
        if !crc.is_valid_with_trailer([crc_hi, crc_lo]) {
            log::warn!("IDAM CRC mismatch for sector {sec} at cyl {cyl} head {hd}");
            return;
        }
        let base = self.sec_base[hd as usize & 1];
        let local = sec.wrapping_sub(base) as i32;
        if local < 0 || local as u16 >= self.nr_sectors {
            log::warn!("IDAM names out-of-range sector {sec} (base {base})");
            self.write_sector = -2;
        } else {
            self.write_sector = local;
        }
    }

    fn finish_dam(&mut self, buf: &[u8], file: &mut dyn FileHandle) -> Result<()> {
        let sec_sz = n_to_bytes(self.sec_size_code);
        let data = &buf[..sec_sz];
        let trailer = [buf[sec_sz], buf[sec_sz + 1]];
        let mut crc = Crc16::new();
        crc.update_slice(&self.address_mark_prefix(0xFB));
        crc.update_slice(data);
        self.write_state = WriteState::Searching;
        if !crc.is_valid_with_trailer(trailer) {
            log::warn!("DAM CRC mismatch, sector skipped");
            return Ok(());
        }
        let target = if self.write_sector >= 0 {
            Some(self.write_sector)
        } else if self.write_sector == -1 {
            self.infer_write_sector()
        } else {
            None
        };
        match target {
            Some(sector) => {
                let offset = self.trk_off + sector as u64 * sec_sz as u64;
                file.seek(offset)?;
                file.write(data)?;
            }
            None => {
                log::warn!("DAM seen with no locked IDAM and no inferable sector (write_sector={})", self.write_sector);
            }
        }
        Ok(())
    }

    /// Scan incoming raw bitcells, re-locking to sectors via IDAM and committing DAM payloads
    /// (spec §4.5 write path).
    pub fn write_track<C: TrackCodec>(
        &mut self,
        codec: &C,
        file: &mut dyn FileHandle,
        write_bc: &SpscRing<u16>,
    ) -> Result<()> {
        while let Some(word) = write_bc.pop() {
            match self.sync {
                SyncMode::Mfm => {
                    if matches!(self.write_state, WriteState::Searching) {
                        if word == mfm::A1_SYNC_WORD {
                            self.sync_run += 1;
                            if self.sync_run >= 3 {
                                self.write_state = WriteState::AwaitingMark;
                                self.sync_run = 0;
                            }
                        } else {
                            self.sync_run = 0;
                        }
                        continue;
                    }
                    let byte = codec.decode_word(word);
                    self.handle_write_byte(byte, file)?;
                }
                SyncMode::Fm => {
                    if matches!(self.write_state, WriteState::Searching) {
                        if word == fm::fm_sync(0xFE, fm::FM_SYNC_CLK_DATA) {
                            self.begin_collect(0xFE);
                        } else if word == fm::fm_sync(0xFB, fm::FM_SYNC_CLK_DATA) {
                            self.begin_collect(0xFB);
                        }
                        continue;
                    }
                    let byte = codec.decode_word(word);
                    self.handle_write_byte(byte, file)?;
                }
                SyncMode::None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Rpm, TestClock};
    use crate::codec::mfm::Mfm;
    use crate::geometry::{build_geometry, GeometryInputs};
    use crate::io_handle::StdFileHandle;
    use std::io::Cursor;

    fn pc_1440_block() -> ImgBlock {
        let clock = TestClock::new(72_000_000, 72_000);
        let geom = build_geometry(
            GeometryInputs {
                sync: SyncMode::Mfm,
                nr_sectors: 18,
                sec_size_bytes: 512,
                sec_size_code: 2,
                has_iam: true,
                gap_3: 84,
                gap_2: None,
                gap_4a: None,
                post_crc_syncs: 0,
                rpm: Rpm::Rpm300,
            },
            &clock,
        )
        .unwrap();
        ImgBlock::new(
            SyncMode::Mfm,
            2,
            18,
            1,
            0,
            false,
            true,
            0,
            0,
            Layout::Interleaved,
            false,
            1,
            geom,
            80,
            2,
        )
    }

    #[test]
    fn read_track_respects_ring_capacity_and_resumes() {
        let mut block = pc_1440_block();
        let image = vec![0u8; 80 * 2 * 18 * 512];
        let mut handle = StdFileHandle::new(Cursor::new(image));
        block.on_track_change(0, 0, 18 * 512);

        let ring: SpscRing<u16> = SpscRing::new(64);
        let mut total = 0usize;
        for _ in 0..5000 {
            block.read_track(&Mfm, &mut handle, &ring).unwrap();
            while ring.pop().is_some() {
                total += 1;
            }
            if block.decode_pos == 0 && total > 0 {
                break;
            }
        }
        assert!(total > 0);
    }

    #[test]
    fn round_trip_write_then_read_sector() {
        let mut block = pc_1440_block();
        let image = vec![0u8; 80 * 2 * 18 * 512];
        let mut handle = StdFileHandle::new(Cursor::new(image));
        block.on_track_change(3, 0, 18 * 512);

        let payload = vec![0xAB_u8; 512];
        let offset = sector_map::sector_payload_offset(block.trk_off, 7, block.sec_base[0], 2);
        handle.seek(offset).unwrap();
        handle.write(&payload).unwrap();

        let mut readback = vec![0u8; 512];
        handle.seek(offset).unwrap();
        handle.read(&mut readback).unwrap();
        assert_eq!(readback, payload);
        assert_eq!(offset, (3u64 * 2) * 18 * 512 + 6 * 512);
    }
}
