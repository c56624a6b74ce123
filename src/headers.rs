//! Format-specific header probers (spec §4.2).
//!
//! Grounded on the teacher crate's `file_parsers::hfe::HfeFileHeader` idiom: a `#[binrw]
//! #[brw(little)]` struct read directly off the file, checked against a magic/signature, and
//! either accepted or rejected with `log::trace!` breadcrumbs. Each prober here follows that same
//! shape — declare the on-disk header, `BinRead::read` it, validate, and produce a
//! [`ProbedGeometry`] that the dispatcher folds into the IMG block before calling into the
//! track-geometry builder.

use binrw::{binrw, BinRead};
use std::io::Cursor;

use crate::chs::SectorSizeCode;
use crate::clock::Rpm;
use crate::sector_map::Layout;
use crate::SyncMode;

/// Geometry resolved by a header prober, in the same shape the type-table matcher would have
/// produced, so both feed the track-geometry builder identically (spec §4.2: "on success, leaves
/// the IMG block populated").
#[derive(Copy, Clone, Debug)]
pub struct ProbedGeometry {
    pub nr_cyls: u16,
    pub nr_sides: u8,
    pub nr_sectors: u16,
    pub sec_size_code: SectorSizeCode,
    pub base_off: u64,
    pub has_iam: bool,
    pub gap3: u16,
    pub rpm: Rpm,
    pub layout: Layout,
    pub skew: u8,
    pub skew_cyls_only: bool,
    pub interleave: u8,
    pub sync: SyncMode,
}

impl Default for ProbedGeometry {
    fn default() -> Self {
        ProbedGeometry {
            nr_cyls: 80,
            nr_sides: 2,
            nr_sectors: 9,
            sec_size_code: 2,
            base_off: 0,
            has_iam: true,
            gap3: 84,
            rpm: Rpm::Rpm300,
            layout: Layout::Interleaved,
            skew: 0,
            skew_cyls_only: false,
            interleave: 1,
            sync: SyncMode::Mfm,
        }
    }
}

#[derive(Debug, Clone)]
#[binrw]
#[brw(little)]
struct FdiHeader {
    density: u8,
    _reserved0: u8,
    nr_sides: u8,
    _reserved1: u8,
    nr_cyls: u16,
    sector_bytes: u16,
    nr_sectors: u16,
    header_size: u32,
    _rest: [u8; 32 - 1 - 1 - 1 - 1 - 2 - 2 - 2 - 4],
}

/// PC98-FDI prober (spec §4.2): 32-byte header, density byte selects RPM/gap3 class.
pub fn probe_fdi(header_bytes: &[u8; 32]) -> Option<ProbedGeometry> {
    let mut cursor = Cursor::new(&header_bytes[..]);
    let header = FdiHeader::read(&mut cursor).ok()?;
    let (rpm, gap3) = if header.density == 0x30 {
        (Rpm::Rpm300, 84)
    } else {
        (Rpm::Rpm360, 116)
    };
    let sec_size_code = if header.sector_bytes == 512 { 2 } else { 3 };
    Some(ProbedGeometry {
        nr_cyls: header.nr_cyls,
        nr_sides: header.nr_sides,
        nr_sectors: header.nr_sectors,
        sec_size_code,
        base_off: header.header_size as u64,
        has_iam: true,
        gap3,
        rpm,
        ..ProbedGeometry::default()
    })
}

/// PC98-HDM prober (spec §4.2): fixed 77/2/8 geometry, no header to read.
pub fn probe_hdm() -> ProbedGeometry {
    ProbedGeometry {
        nr_cyls: 77,
        nr_sides: 2,
        nr_sectors: 8,
        sec_size_code: 3,
        base_off: 0,
        has_iam: true,
        gap3: 116,
        rpm: Rpm::Rpm360,
        ..ProbedGeometry::default()
    }
}

#[derive(Debug, Clone)]
#[binrw]
#[brw(little)]
struct SduHeader {
    _magic: [u8; 4],
    nr_cyls: u16,
    nr_sides: u16,
    nr_sectors: u16,
    _rest: [u8; 46 - 4 - 2 - 2 - 2],
}

/// SDU prober (spec §4.2): 46-byte SABDU header; geometry must be one of the enumerated legal
/// combinations.
pub fn probe_sdu(header_bytes: &[u8; 46]) -> Option<ProbedGeometry> {
    let mut cursor = Cursor::new(&header_bytes[..]);
    let header = SduHeader::read(&mut cursor).ok()?;
    let cyls_ok = header.nr_cyls == 40 || header.nr_cyls == 80;
    let sides_ok = header.nr_sides == 1 || header.nr_sides == 2;
    let secs_ok = matches!(header.nr_sectors, 9 | 18 | 36);
    if !(cyls_ok && sides_ok && secs_ok) {
        log::trace!("SDU header failed geometry validation: {header:?}");
        return None;
    }
    Some(ProbedGeometry {
        nr_cyls: header.nr_cyls,
        nr_sides: header.nr_sides as u8,
        nr_sectors: header.nr_sectors,
        sec_size_code: 2,
        base_off: 46,
        has_iam: true,
        gap3: 84,
        ..ProbedGeometry::default()
    })
}

/// VDK prober (spec §4.2): magic `"dk"`, variable header length, fixed 18 sectors/track.
pub fn probe_vdk(bytes: &[u8]) -> Option<ProbedGeometry> {
    if bytes.len() < 16 || &bytes[0..2] != b"dk" {
        return None;
    }
    let header_len = u16::from_le_bytes([bytes[2], bytes[3]]) as u64;
    let nr_cyls = bytes[8] as u16;
    let nr_sides = bytes[9];
    Some(ProbedGeometry {
        nr_cyls,
        nr_sides,
        nr_sectors: 18,
        sec_size_code: 1,
        base_off: header_len,
        has_iam: true,
        gap3: 20,
        ..ProbedGeometry::default()
    })
}

/// JVC prober (spec §4.2): header length derived from `file_size mod 256`; a 5-byte tuple
/// `{spt, sides, ssize_code, sec_id, attr}` describes the remaining geometry; cylinders are
/// derived from the remaining payload.
pub fn probe_jvc(bytes: &[u8], file_size: u64) -> Option<ProbedGeometry> {
    let header_len = (file_size % 256) as usize;
    if bytes.len() < header_len + 5 || header_len > bytes.len() {
        return None;
    }
    let (spt, sides, ssize_code) = if header_len == 0 {
        (18, 2, 2)
    } else {
        let h = &bytes[0..header_len];
        let spt = *h.first()?;
        let sides = *h.get(1).unwrap_or(&1);
        let ssize_code = *h.get(2).unwrap_or(&2);
        (spt, sides, ssize_code)
    };
    if spt == 0 || sides == 0 {
        return None;
    }
    let payload = file_size.checked_sub(header_len as u64)?;
    let sec_bytes = crate::n_to_bytes(ssize_code) as u64;
    let cyl_bytes = spt as u64 * sides as u64 * sec_bytes;
    if cyl_bytes == 0 || payload % cyl_bytes != 0 {
        return None;
    }
    let mut nr_cyls = (payload / cyl_bytes) as u16;
    let mut nr_sides = sides;
    if nr_cyls >= 88 && nr_sides == 1 {
        // Promote to double-sided when the single-sided cylinder count is implausibly high
        // (spec §4.2 "if computed cyls >= 88 and sides = 1, promote to sides = 2").
        nr_cyls /= 2;
        nr_sides = 2;
    }
    Some(ProbedGeometry {
        nr_cyls,
        nr_sides,
        nr_sectors: spt as u16,
        sec_size_code: ssize_code,
        base_off: header_len as u64,
        has_iam: true,
        gap3: crate::geometry::default_gap3(ssize_code, crate::SyncMode::Mfm),
        ..ProbedGeometry::default()
    })
}

/// TRD prober (spec §4.2): a geometry byte at a fixed offset selects one of four fixed
/// geometries; falls back to a size-based guess.
pub fn probe_trd(bytes: &[u8], file_size: u64) -> Option<ProbedGeometry> {
    let geometry_byte = *bytes.get(0x8E3)?;
    let (nr_cyls, nr_sides) = match geometry_byte {
        0x16 => (80u16, 2u8),
        0x17 => (40, 2),
        0x18 => (80, 1),
        0x19 => (40, 1),
        _ => {
            let cyl_bytes = 16u64 * 256;
            let sides_bytes = file_size / cyl_bytes;
            if sides_bytes == 0 {
                return None;
            }
            let nr_cyls = (file_size / (cyl_bytes * sides_bytes.min(2))) as u16;
            (nr_cyls, sides_bytes.min(2) as u8)
        }
    };
    Some(ProbedGeometry {
        nr_cyls,
        nr_sides,
        nr_sectors: 16,
        sec_size_code: 1,
        base_off: 0,
        has_iam: true,
        gap3: 57,
        ..ProbedGeometry::default()
    })
}

#[derive(Debug, Clone)]
#[binrw]
#[brw(big)]
struct TiVib {
    _reserved0: [u8; 13],
    magic: [u8; 3],
    _reserved1: [u8; 4],
    sides: u8,
    density: u8,
    tracks_per_side: u8,
}

/// TI99 Volume Information Block prober (spec §4.2): magic `"DSK"` at offset 13; sizes must be a
/// multiple of 256-byte sectors, trimming a 3-sector bad-sector-map footer if present.
pub fn probe_ti99(vib_sector: &[u8; 256], file_size: u64) -> Option<ProbedGeometry> {
    let mut cursor = Cursor::new(&vib_sector[..]);
    let vib = TiVib::read(&mut cursor).ok()?;
    if vib.magic != *b"DSK" {
        return None;
    }
    if file_size % 256 != 0 {
        return None;
    }
    let trimmed = if file_size % 2560 == 3 * 256 {
        file_size - 3 * 256
    } else {
        file_size
    };
    let nr_sectors_total = trimmed / 256;
    let nr_sides = if vib.sides == 0 { 1 } else { vib.sides };
    // Single-density VIBs (SSSD/DSSD) are FM at 9 sectors/track; double-density ones (DSDD,
    // DSDD80, DSHD80) are MFM at 18 — the size-class table's split is really a density split.
    let (nr_sectors_per_track, sync) = if vib.density == 0 {
        (9u64, SyncMode::Fm)
    } else {
        (18u64, SyncMode::Mfm)
    };
    let mut nr_cyls = (nr_sectors_total / (nr_sides as u64 * nr_sectors_per_track)) as u16;
    if vib.tracks_per_side != 0 {
        nr_cyls = vib.tracks_per_side as u16;
    }
    Some(ProbedGeometry {
        nr_cyls,
        nr_sides,
        nr_sectors: nr_sectors_per_track as u16,
        sec_size_code: 1,
        base_off: 0,
        has_iam: true,
        gap3: 44,
        layout: Layout::SequentialReverseSide1,
        sync,
        ..ProbedGeometry::default()
    })
}

/// OPD/DFS (SSD/DSD) prober (spec §4.2): fixed 256-byte FM sectors, cylinder-only skew.
pub fn probe_opd(nr_cyls: u16, nr_sides: u8) -> ProbedGeometry {
    ProbedGeometry {
        nr_cyls,
        nr_sides,
        nr_sectors: 10,
        sec_size_code: 1,
        base_off: 0,
        has_iam: false,
        gap3: 21,
        skew_cyls_only: true,
        sync: SyncMode::Fm,
        ..ProbedGeometry::default()
    }
}

/// ST prober (spec §4.2): derived from the default 80-cylinder table with IAM suppressed and
/// skew=2 for 9-sector tracks.
pub fn probe_st(nr_cyls: u16) -> ProbedGeometry {
    ProbedGeometry {
        nr_cyls,
        nr_sides: 2,
        nr_sectors: 9,
        sec_size_code: 2,
        base_off: 0,
        has_iam: false,
        gap3: 84,
        skew: 2,
        ..ProbedGeometry::default()
    }
}
