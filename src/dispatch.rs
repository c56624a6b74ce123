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

//! Format dispatch and handler selection (spec §4.1, §4.2, §6 "Handler vtable").
//!
//! Grounded on the teacher crate's `detect::detect_image_format` (`for format in
//! IMAGE_FORMATS.iter() { if format.detect(&mut image) { return ... } }`): an ordered list of
//! strategies, each given a chance to claim the image before the next is tried. This engine's
//! strategies are not closed trait objects, though, since each prober wants a different slice of
//! the header rather than a shared `detect(&mut T) -> bool`; [`open`] inlines the same ordering
//! discipline as a sequence of early returns instead.
//!
//! The ordering follows spec §4.2's own listing, with one addition: HFE's 8-byte magic is checked
//! before any IMG-family prober runs, since an HFE file's first bytes never coincidentally satisfy
//! an IMG header's size or field checks, but trying IMG probers against an HFE file first would
//! waste a full header read for nothing. Magic-bearing probers (SDU, VDK, TI99) are tried next,
//! ahead of the size/host-gated ones (FDI, HDM, JVC, TRD, OPD, ST), because a magic match is never
//! ambiguous while a bare file-size match can coincidentally fit more than one table entry.

use bitflags::bitflags;

use crate::chs::SectorSizeCode;
use crate::clock::Clock;
use crate::config::CustomTable;
use crate::error::{Result, TrackEngineError};
use crate::geometry::{self, GeometryInputs};
use crate::headers::{self, ProbedGeometry};
use crate::hfe::HfeBlock;
use crate::host::HostProfile;
use crate::img::ImgBlock;
use crate::io_handle::FileHandle;
use crate::sector_map::Layout;
use crate::type_table::{self, RawEntry};
use crate::SyncMode;

bitflags! {
    /// What a resolved format is capable of, mirroring the teacher's `FormatCaps` bit-set used to
    /// pick among candidate formats by capability rather than by name.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct FormatCaps: u32 {
        /// The underlying medium can be written back to (spec §6: HFE write-window, IMG re-lock).
        const WRITABLE         = 0b0000_0001;
        /// Bitcells are synthesized on demand from logical sector payloads (the IMG family).
        const SECTOR_SYNTHESIS = 0b0000_0010;
        /// Bitcells are read pre-encoded from the file and merely timed out (the HFE family).
        const PRE_ENCODED      = 0b0000_0100;
        /// FM (single-density) bit encoding, as opposed to MFM.
        const FM_ENCODING      = 0b0000_1000;
        /// The host resolves geometry through a prober that bypasses the generic type table.
        const DEDICATED_PROBE  = 0b0001_0000;
    }
}

/// The handler-specific state an opened image carries, keyed by which family claimed it (spec §3:
/// "mutually exclusive format-specific block").
pub enum OpenedImage {
    Img(ImgBlock),
    Hfe(HfeBlock),
}

impl OpenedImage {
    pub fn caps(&self) -> FormatCaps {
        match self {
            OpenedImage::Img(block) => {
                let mut caps = FormatCaps::WRITABLE | FormatCaps::SECTOR_SYNTHESIS;
                if matches!(block.sync, SyncMode::Fm) {
                    caps |= FormatCaps::FM_ENCODING;
                }
                caps
            }
            OpenedImage::Hfe(_) => FormatCaps::WRITABLE | FormatCaps::PRE_ENCODED,
        }
    }
}

/// Open an image file against a host profile, trying each strategy in turn until one claims it
/// (spec §4.2: "on failure it either returns false ... or bails").
pub fn open(file: &mut dyn FileHandle, host: HostProfile, clock: &dyn Clock) -> Result<OpenedImage> {
    open_with_overrides(file, host, clock, None)
}

/// As [`open`], but consults `overrides` (an `IMG.CFG`-equivalent row set, see [`crate::config`])
/// ahead of the host's compiled type table during the generic table walk.
pub fn open_with_overrides(
    file: &mut dyn FileHandle,
    host: HostProfile,
    clock: &dyn Clock,
    overrides: Option<&CustomTable>,
) -> Result<OpenedImage> {
    let file_size = file.size()?;

    if let Some(hfe) = try_open_hfe(file, clock)? {
        return Ok(OpenedImage::Hfe(hfe));
    }

    if host.has_dedicated_open_path() {
        return open_ti99(file, file_size, host, clock);
    }

    if let Some(probed) = try_magic_probers(file, file_size)? {
        return build_img(file, probed, host, clock, 1, false);
    }

    if host == HostProfile::Pc98 {
        if let Some(probed) = try_pc98_probers(file)? {
            return build_img(file, probed, host, clock, 1, false);
        }
    }

    if let Some((probed, base, itn)) = try_table_match(file, file_size, host, overrides)? {
        return build_img(file, probed, host, clock, base, itn);
    }

    if let Some(probed) = try_last_resort_probers(file, file_size)? {
        return build_img(file, probed, host, clock, 1, false);
    }

    Err(TrackEngineError::UnknownFormat)
}

fn try_open_hfe(file: &mut dyn FileHandle, clock: &dyn Clock) -> Result<Option<HfeBlock>> {
    let mut magic = [0u8; 8];
    file.seek(0)?;
    if file.read(&mut magic).is_err() {
        return Ok(None);
    }
    if magic != *crate::hfe::MAGIC_V3 && magic != *crate::hfe::MAGIC_V1 {
        return Ok(None);
    }
    file.seek(0)?;
    Ok(Some(HfeBlock::open(file, clock)?))
}

fn open_ti99(
    file: &mut dyn FileHandle,
    file_size: u64,
    host: HostProfile,
    clock: &dyn Clock,
) -> Result<OpenedImage> {
    let mut vib = [0u8; 256];
    file.seek(0)?;
    file.read(&mut vib)?;
    let probed = headers::probe_ti99(&vib, file_size).ok_or(TrackEngineError::FormatReject)?;
    build_img(file, probed, host, clock, 1, false)
}

/// SDU and VDK carry a self-describing header and are checked before any size-gated prober, since
/// a magic match can never be ambiguous (spec §4.2: SDU's 46-byte SABDU header, VDK's `"dk"` tag).
fn try_magic_probers(file: &mut dyn FileHandle, file_size: u64) -> Result<Option<ProbedGeometry>> {
    let mut sdu_header = [0u8; 46];
    file.seek(0)?;
    if file.read(&mut sdu_header).is_ok() {
        if let Some(probed) = headers::probe_sdu(&sdu_header) {
            return Ok(Some(probed));
        }
    }

    let header_len = (file_size as usize).min(4096);
    let mut vdk_bytes = vec![0u8; header_len];
    file.seek(0)?;
    if file.read(&mut vdk_bytes).is_ok() {
        if let Some(probed) = headers::probe_vdk(&vdk_bytes) {
            return Ok(Some(probed));
        }
    }

    Ok(None)
}

/// PC98's two formats (FDI, HDM) only make sense for a PC98-profiled host; FDI needs a 32-byte
/// header read while HDM is a fixed-geometry format with nothing to read at all.
fn try_pc98_probers(file: &mut dyn FileHandle) -> Result<Option<ProbedGeometry>> {
    let mut fdi_header = [0u8; 32];
    file.seek(0)?;
    if file.read(&mut fdi_header).is_ok() {
        if let Some(probed) = headers::probe_fdi(&fdi_header) {
            return Ok(Some(probed));
        }
    }
    Ok(Some(headers::probe_hdm()))
}

/// The generic type-table walk (spec §4.1), including the MSX/PC-DOS BPB probe that runs ahead of
/// the table, an optional caller-supplied override table consulted before the compiled one (spec
/// §6 "Configuration", see [`crate::config::CustomTable`]), and the Gem/ST table that now resolves
/// through [`type_table::table_for_host`].
fn try_table_match(
    file: &mut dyn FileHandle,
    file_size: u64,
    host: HostProfile,
    overrides: Option<&CustomTable>,
) -> Result<Option<(ProbedGeometry, u8, bool)>> {
    if matches!(host, HostProfile::Msx | HostProfile::PcDos) {
        let mut boot_sector = vec![0u8; 512];
        file.seek(0)?;
        if file.read(&mut boot_sector).is_ok() {
            let require_signature = host == HostProfile::PcDos;
            if let Some(bpb) = type_table::probe_bpb(&boot_sector, require_signature) {
                return Ok(Some((probed_from_bpb(bpb), 1, false)));
            }
        }
    }

    if let Some(overrides) = overrides {
        if let Some(m) = overrides.match_against(0, file_size) {
            return Ok(Some((
                probed_from_entry(&m.entry, m.nr_cyls),
                m.entry.base(),
                m.entry.inter_track_numbering(),
            )));
        }
    }

    let table = type_table::table_for_host(host);
    let matched = type_table::match_table(table, 0, file_size);
    Ok(matched.map(|m| {
        (
            probed_from_entry(&m.entry, m.nr_cyls),
            m.entry.base(),
            m.entry.inter_track_numbering(),
        )
    }))
}

fn probed_from_bpb(bpb: type_table::BpbProbe) -> ProbedGeometry {
    let sec_size_code = crate::bytes_to_n(bpb.bytes_per_sector as usize);
    let nr_cyls = (bpb.total_sectors / bpb.sectors_per_track as u32 / bpb.nr_sides as u32) as u16;
    ProbedGeometry {
        nr_cyls,
        nr_sides: bpb.nr_sides,
        nr_sectors: bpb.sectors_per_track as u16,
        sec_size_code,
        base_off: 0,
        has_iam: true,
        gap3: geometry::default_gap3(sec_size_code, SyncMode::Mfm),
        rpm: crate::clock::Rpm::Rpm300,
        layout: Layout::Interleaved,
        skew: 0,
        skew_cyls_only: false,
        interleave: 1,
        sync: SyncMode::Mfm,
    }
}

fn probed_from_entry(entry: &RawEntry, nr_cyls: u16) -> ProbedGeometry {
    ProbedGeometry {
        nr_cyls,
        nr_sides: entry.nr_sides(),
        nr_sectors: entry.nr_secs() as u16,
        sec_size_code: entry.sec_size_code(),
        base_off: 0,
        has_iam: entry.has_iam(),
        gap3: entry.gap3(),
        rpm: entry.rpm(),
        layout: Layout::Interleaved,
        skew: entry.skew(),
        skew_cyls_only: false,
        interleave: entry.interleave(),
        sync: SyncMode::Mfm,
    }
}

/// TRD, JVC, OPD and ST only activate once the table walk has failed: JVC's header-length
/// heuristic (`file_size mod 256`) can accept almost any file, TRD's geometry byte only
/// disambiguates a handful of sizes the default table already covers unambiguously, and OPD/ST
/// are bare size-multiple guesses with no signature of their own (spec §4.2).
fn try_last_resort_probers(file: &mut dyn FileHandle, file_size: u64) -> Result<Option<ProbedGeometry>> {
    let mut whole = vec![0u8; file_size.min(4096) as usize];
    file.seek(0)?;
    if file.read(&mut whole).is_ok() {
        if let Some(probed) = headers::probe_trd(&whole, file_size) {
            return Ok(Some(probed));
        }
        if let Some(probed) = headers::probe_jvc(&whole, file_size) {
            return Ok(Some(probed));
        }
    }

    const OPD_TRACK_BYTES: u64 = 10 * 256;
    if file_size != 0 && file_size % OPD_TRACK_BYTES == 0 {
        let total_tracks = file_size / OPD_TRACK_BYTES;
        if (40..=160).contains(&total_tracks) {
            let (nr_cyls, nr_sides) = if total_tracks <= 80 {
                (total_tracks as u16, 1)
            } else {
                ((total_tracks / 2) as u16, 2)
            };
            return Ok(Some(headers::probe_opd(nr_cyls, nr_sides)));
        }
    }

    const ST_TRACK_BYTES: u64 = 9 * 2 * 512;
    if file_size != 0 && file_size % ST_TRACK_BYTES == 0 {
        let nr_cyls = (file_size / ST_TRACK_BYTES) as u16;
        if (38..=85).contains(&nr_cyls) {
            return Ok(Some(headers::probe_st(nr_cyls)));
        }
    }

    Ok(None)
}

/// Resolve a [`ProbedGeometry`] into an open [`ImgBlock`] by running the track-geometry builder
/// (spec §4.3) and applying the host's gap overrides and skew policy (spec §6).
fn build_img(
    file: &mut dyn FileHandle,
    probed: ProbedGeometry,
    host: HostProfile,
    clock: &dyn Clock,
    base: u8,
    inter_track_numbering: bool,
) -> Result<OpenedImage> {
    let sync = probed.sync;
    let _ = file;

    let (gap_2, gap_4a, post_crc_syncs) = match host.gap_overrides() {
        Some((g2, g4a, syncs)) => (Some(g2), Some(g4a), syncs),
        None => (None, None, 0),
    };

    let inputs = GeometryInputs {
        sync,
        nr_sectors: probed.nr_sectors,
        sec_size_bytes: crate::n_to_bytes(probed.sec_size_code) as u32,
        sec_size_code: probed.sec_size_code,
        has_iam: probed.has_iam,
        gap_3: probed.gap3,
        gap_2,
        gap_4a,
        post_crc_syncs,
        rpm: probed.rpm,
    };
    let built = geometry::build_geometry(inputs, clock)?;

    let skew_cyls_only = probed.skew_cyls_only || host.forces_skew_cyls_only();

    let block = ImgBlock::new(
        sync,
        probed.sec_size_code as SectorSizeCode,
        probed.nr_sectors,
        probed.interleave,
        probed.skew,
        skew_cyls_only,
        probed.has_iam,
        post_crc_syncs,
        probed.base_off,
        probed.layout,
        inter_track_numbering,
        base,
        built,
        probed.nr_cyls,
        probed.nr_sides,
    );
    Ok(OpenedImage::Img(block))
}
