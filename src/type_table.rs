//! IMG type tables and the size/host matcher (spec §4.1).
//!
//! The teacher crate's closest relative is `standard_format::StandardFormat`: a small closed set
//! of PC geometries keyed by file size via a `From<usize>` match arm. This engine generalizes that
//! one-size-one-geometry idea into an ordered table of geometry tuples walked in order, because a
//! single file size can correspond to different geometries on different host platforms and even,
//! within one host, to more than one candidate cylinder count (spec §4.1's "ties are resolved by
//! table order").
//!
//! Per spec §9's design note, entries are kept as plain records rather than behind any runtime
//! reflection; [`RawEntry`] packs one entry into 8 bytes so a full table is a `'static` byte-dense
//! array, in the spirit of the teacher's preference for compile-time data over dynamic dispatch
//! (see the `bytemuck`-backed structures the pack's other examples use for on-disk record
//! casting).

use bytemuck::{Pod, Zeroable};

use crate::chs::SectorSizeCode;
use crate::clock::Rpm;
use crate::n_to_bytes;

/// Which cylinder-count family an entry's image sizes are drawn from (spec §4.1: "a cylinder
/// count in `{38..42}` (40-class) or `{77..85}` (80-class)").
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CylsClass {
    Forty,
    Eighty,
}

impl CylsClass {
    pub fn candidates(&self) -> std::ops::RangeInclusive<u16> {
        match self {
            CylsClass::Forty => 38..=42,
            CylsClass::Eighty => 77..=85,
        }
    }
}

/// One entry of a type table, packed to 8 bytes (spec §9: "pack naturally into 6-8 bytes each").
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct RawEntry {
    gap3: u16,
    nr_secs: u8,
    nr_sides: u8,
    sec_size_code: u8,
    interleave: u8,
    skew: u8,
    /// bit0 has_iam, bit1 base, bit2 inter_track_numbering, bit3 cyls_class(0=40,1=80),
    /// bit4 rpm(0=300,1=360).
    flags: u8,
}

const FLAG_HAS_IAM: u8 = 1 << 0;
const FLAG_BASE: u8 = 1 << 1;
const FLAG_ITN: u8 = 1 << 2;
const FLAG_80_CYL: u8 = 1 << 3;
const FLAG_360_RPM: u8 = 1 << 4;

impl RawEntry {
    pub const fn new(
        nr_secs: u8,
        nr_sides: u8,
        has_iam: bool,
        gap3: u16,
        interleave: u8,
        sec_size_code: u8,
        base: u8,
        inter_track_numbering: bool,
        skew: u8,
        cyls_class_eighty: bool,
        rpm_360: bool,
    ) -> Self {
        let mut flags = 0u8;
        if has_iam {
            flags |= FLAG_HAS_IAM;
        }
        if base != 0 {
            flags |= FLAG_BASE;
        }
        if inter_track_numbering {
            flags |= FLAG_ITN;
        }
        if cyls_class_eighty {
            flags |= FLAG_80_CYL;
        }
        if rpm_360 {
            flags |= FLAG_360_RPM;
        }
        RawEntry { nr_secs, nr_sides, sec_size_code, interleave, skew, gap3, flags }
    }

    pub fn nr_secs(&self) -> u8 {
        self.nr_secs
    }
    pub fn nr_sides(&self) -> u8 {
        self.nr_sides
    }
    pub fn sec_size_code(&self) -> SectorSizeCode {
        self.sec_size_code
    }
    pub fn interleave(&self) -> u8 {
        self.interleave
    }
    pub fn skew(&self) -> u8 {
        self.skew
    }
    pub fn gap3(&self) -> u16 {
        self.gap3
    }
    pub fn has_iam(&self) -> bool {
        self.flags & FLAG_HAS_IAM != 0
    }
    pub fn base(&self) -> u8 {
        if self.flags & FLAG_BASE != 0 {
            1
        } else {
            0
        }
    }
    pub fn inter_track_numbering(&self) -> bool {
        self.flags & FLAG_ITN != 0
    }
    pub fn cyls_class(&self) -> CylsClass {
        if self.flags & FLAG_80_CYL != 0 {
            CylsClass::Eighty
        } else {
            CylsClass::Forty
        }
    }
    pub fn rpm(&self) -> Rpm {
        if self.flags & FLAG_360_RPM != 0 {
            Rpm::Rpm360
        } else {
            Rpm::Rpm300
        }
    }

    /// Bytes in one cylinder (both sides) at the given candidate cylinder count's sector size.
    fn cyl_size(&self) -> u64 {
        self.nr_secs as u64 * self.nr_sides as u64 * n_to_bytes(self.sec_size_code) as u64
    }
}

/// The outcome of a successful [`match_table`] walk: the matched entry plus the cylinder count
/// that made the product match.
#[derive(Copy, Clone, Debug)]
pub struct MatchResult {
    pub entry: RawEntry,
    pub nr_cyls: u16,
}

/// Walk `table` in order; for each entry, try every candidate cylinder count in its class and
/// accept the first whose `(nr_cyls, cyl_size)` product equals the image payload size (spec
/// §4.1). `base_off` is subtracted from `f_size` first, since header-prefixed formats account for
/// their own header bytes before calling into the matcher.
pub fn match_table(table: &[RawEntry], base_off: u64, f_size: u64) -> Option<MatchResult> {
    let payload = f_size.checked_sub(base_off)?;
    for entry in table {
        let cyl_size = entry.cyl_size();
        if cyl_size == 0 {
            continue;
        }
        for cyl in entry.cyls_class().candidates() {
            if cyl as u64 * cyl_size == payload {
                return Some(MatchResult { entry: *entry, nr_cyls: cyl });
            }
        }
    }
    None
}

/// The default (generic PC-compatible) type table. Order matters: the most common geometry for
/// each size appears first, per spec §4.1.
pub const DEFAULT_TABLE: &[RawEntry] = &[
    // 3.5" 1.44M: 80 cyl, 2 sides, 18 sec, 512 B, IAM, gap3 84 (spec §8 seed scenario 1).
    RawEntry::new(18, 2, true, 84, 1, 2, 1, false, 0, true, false),
    // 3.5" 720K: 80 cyl, 2 sides, 9 sec, 512 B, IAM, gap3 84.
    RawEntry::new(9, 2, true, 84, 1, 2, 1, false, 0, true, false),
    // 5.25" 1.2M: 80 cyl, 2 sides, 15 sec, 512 B, IAM, gap3 84, 360 RPM.
    RawEntry::new(15, 2, true, 84, 1, 2, 1, false, 0, true, true),
    // 5.25" 360K: 40 cyl, 2 sides, 9 sec, 512 B, IAM, gap3 84.
    RawEntry::new(9, 2, true, 84, 1, 2, 1, false, 0, false, false),
    // 5.25" 180K: 40 cyl, 1 side, 9 sec, 512 B, IAM, gap3 84.
    RawEntry::new(9, 1, true, 84, 1, 2, 1, false, 0, false, false),
];

/// ST 720K table (spec §4.2 "ST"): derived from the default 80-cyl table with the IAM suppressed
/// and skew=2 for 9-sector tracks (spec §8 seed scenario 2).
pub const ST_TABLE: &[RawEntry] = &[RawEntry::new(9, 2, false, 84, 1, 2, 1, false, 2, true, false)];

/// Kaypro table (spec §8 seed scenario 3): inter-track numbering, interleave 3, 400K geometry.
pub const KAYPRO_TABLE: &[RawEntry] =
    &[RawEntry::new(10, 2, true, 84, 3, 2, 1, true, 0, false, false)];

/// AKAI sampler disk table. AKAI images are 720K-class MFM floppies with no IAM.
pub const AKAI_TABLE: &[RawEntry] = &[RawEntry::new(9, 2, false, 84, 1, 2, 1, false, 0, true, false)];

/// Casio disk table, single-sided 320K-class images.
pub const CASIO_TABLE: &[RawEntry] = &[RawEntry::new(8, 1, true, 84, 1, 2, 1, false, 0, false, false)];

/// DEC RX50-class table: single-sided, 80 track, 10 sectors of 512 B.
pub const DEC_TABLE: &[RawEntry] = &[RawEntry::new(10, 1, true, 84, 2, 2, 1, false, 0, true, false)];

/// Ensoniq sampler disk table, 720K-class geometry shared with AKAI.
pub const ENSONIQ_TABLE: &[RawEntry] = AKAI_TABLE;

/// Fluke disk table, 360K-class geometry.
pub const FLUKE_TABLE: &[RawEntry] = &[RawEntry::new(9, 2, true, 84, 1, 2, 1, false, 0, false, false)];

/// Memotech disk table, single-sided 40-track geometry.
pub const MEMOTECH_TABLE: &[RawEntry] =
    &[RawEntry::new(10, 1, true, 84, 1, 2, 1, false, 0, false, false)];

/// NASCOM disk table; the host also forces `skew_cyls_only` (spec §6), applied by the caller, not
/// encoded in the table itself.
pub const NASCOM_TABLE: &[RawEntry] = &[RawEntry::new(10, 1, true, 84, 1, 1, 1, false, 1, false, false)];

/// PC98 2HD table, used when the FDI/HDM prober does not already fully resolve geometry.
pub const PC98_TABLE: &[RawEntry] = &[RawEntry::new(8, 2, true, 116, 1, 3, 1, false, 0, true, true)];

/// UKNC table; the host also overrides `gap_2`/`gap_4a`/`post_crc_syncs` (spec §6), applied by
/// the track-geometry builder, not encoded here.
pub const UKNC_TABLE: &[RawEntry] = &[RawEntry::new(10, 2, true, 84, 1, 2, 1, false, 0, true, false)];

/// Resolve the type table to walk for a given host profile (spec §4.1: "Host-profile dispatch
/// selects one of several tables ... before the walk"). Hosts with a dedicated open path (TI99)
/// never reach the generic matcher and have no table here.
pub fn table_for_host(host: crate::host::HostProfile) -> &'static [RawEntry] {
    use crate::host::HostProfile::*;
    match host {
        Default | PcDos | Msx => DEFAULT_TABLE,
        Gem => ST_TABLE,
        Akai => AKAI_TABLE,
        Casio => CASIO_TABLE,
        Dec => DEC_TABLE,
        Ensoniq => ENSONIQ_TABLE,
        Fluke => FLUKE_TABLE,
        Kaypro => KAYPRO_TABLE,
        Memotech => MEMOTECH_TABLE,
        Nascom => NASCOM_TABLE,
        Pc98 => PC98_TABLE,
        Uknc => UKNC_TABLE,
        Ti99 => &[],
    }
}

/// A BIOS Parameter Block probe at the fixed offsets spec §4.1 names, tried for MSX and PC-DOS
/// hosts before falling back to the default table.
pub struct BpbProbe {
    pub sectors_per_track: u8,
    pub nr_sides: u8,
    pub total_sectors: u32,
    pub bytes_per_sector: u16,
}

/// Probe a 512-byte boot sector for a plausible BPB. PC-DOS requires the `0xAA55` signature at
/// offset 510; MSX tolerates its absence (spec §4.1).
pub fn probe_bpb(boot_sector: &[u8], require_signature: bool) -> Option<BpbProbe> {
    if boot_sector.len() < 512 {
        return None;
    }
    if require_signature {
        let sig = u16::from_le_bytes([boot_sector[510], boot_sector[511]]);
        if sig != 0xAA55 {
            return None;
        }
    }
    let bytes_per_sector = u16::from_le_bytes([boot_sector[11], boot_sector[12]]);
    let sectors_per_track = boot_sector[24];
    let nr_sides = boot_sector[26];
    let total_sectors_16 = u16::from_le_bytes([boot_sector[19], boot_sector[20]]);
    let total_sectors = if total_sectors_16 != 0 {
        total_sectors_16 as u32
    } else {
        return None;
    };
    if bytes_per_sector == 0 || sectors_per_track == 0 || nr_sides == 0 {
        return None;
    }
    Some(BpbProbe { sectors_per_track, nr_sides, total_sectors, bytes_per_sector })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_pc_1440k_as_first_candidate() {
        let result = match_table(DEFAULT_TABLE, 0, 80 * 2 * 18 * 512).unwrap();
        assert_eq!(result.nr_cyls, 80);
        assert_eq!(result.entry.nr_secs(), 18);
        assert_eq!(result.entry.gap3(), 84);
        assert!(result.entry.has_iam());
    }

    #[test]
    fn matches_pc_720k_not_1440k() {
        let result = match_table(DEFAULT_TABLE, 0, 80 * 2 * 9 * 512).unwrap();
        assert_eq!(result.entry.nr_secs(), 9);
    }

    #[test]
    fn rejects_size_with_no_matching_geometry() {
        assert!(match_table(DEFAULT_TABLE, 0, 12345).is_none());
    }

    #[test]
    fn st_table_has_no_iam_and_skew_two() {
        let result = match_table(ST_TABLE, 0, 80 * 2 * 9 * 512).unwrap();
        assert!(!result.entry.has_iam());
        assert_eq!(result.entry.skew(), 2);
    }

    #[test]
    fn gem_host_resolves_to_st_table_not_default() {
        let table = table_for_host(crate::host::HostProfile::Gem);
        assert_eq!(table.as_ptr(), ST_TABLE.as_ptr());
    }

    #[test]
    fn bpb_probe_rejects_missing_signature_when_required() {
        let mut boot = vec![0u8; 512];
        boot[11] = 0;
        boot[12] = 2;
        boot[24] = 18;
        boot[26] = 2;
        boot[19] = 0xF0;
        boot[20] = 0x0B;
        assert!(probe_bpb(&boot, true).is_none());
        boot[510] = 0x55;
        boot[511] = 0xAA;
        assert!(probe_bpb(&boot, true).is_some());
    }
}
