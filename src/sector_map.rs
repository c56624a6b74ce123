//! Sector rotational map and layout-to-file-offset translation (spec §4.4).
//!
//! The teacher crate has no rotational-order concept of its own (its `SectorMapEntry` records an
//! already-decoded sector's address, not a slot to be filled during synthesis), so this module is
//! grounded directly on the spec's own pseudocode rather than adapted from a specific teacher
//! file; it keeps the teacher's general preference for small `Copy` value types and fixed-size
//! arrays over heap-allocated containers (mirroring `DiskChs`'s plain-struct style) by writing
//! into a caller-supplied slice instead of returning a `Vec`.

use crate::chs::SectorSizeCode;
use crate::MAX_SEC_MAP;

/// How `sec_map`-order sectors translate into on-file byte offsets (spec §4.4).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Layout {
    Interleaved,
    InterleavedSwapSides,
    SequentialReverseSide1,
}

/// Build the rotational sector map for one track into `out[..nr_sectors]`, per spec §4.4.
/// `track` is the linear track index (`cyl*nr_sides + side`); `cyl` is used instead when
/// `skew_cyls_only` is set (NASCOM/ADFS-style hosts, spec §6).
pub fn build_sec_map(
    out: &mut [u8; MAX_SEC_MAP],
    nr_sectors: u16,
    interleave: u8,
    skew: u8,
    base: u8,
    skew_cyls_only: bool,
    cyl: u16,
    track: u16,
) {
    let n = nr_sectors as usize;
    debug_assert!(n <= MAX_SEC_MAP);
    out[..n].fill(0xFF);

    let skew_unit = if skew_cyls_only { cyl } else { track };
    let mut pos = (skew_unit as usize * skew as usize) % n;
    let interleave = (interleave as usize).max(1);

    for i in 0..n {
        while out[pos] != 0xFF {
            pos = (pos + 1) % n;
        }
        out[pos] = base.wrapping_add(i as u8);
        pos = (pos + interleave) % n;
    }
}

/// Sector base numbers for head 0 and head 1. When `inter_track_numbering` is set, head 1's
/// numbering continues where head 0 left off (spec §4.4: "seeding `sec_base[1] = base +
/// nr_sectors`").
pub fn sector_bases(base: u8, nr_sectors: u16, inter_track_numbering: bool) -> [u8; 2] {
    if inter_track_numbering {
        [base, base.wrapping_add(nr_sectors as u8)]
    } else {
        [base, base]
    }
}

/// Translate a track's (cylinder, side) into its file offset, per the layout policy (spec §4.4).
/// `base_off` (header prefix bytes) is added unconditionally.
pub fn track_offset(
    layout: Layout,
    cyl: u16,
    side: u8,
    nr_sides: u8,
    nr_cyls: u16,
    trk_len: u64,
    base_off: u64,
) -> u64 {
    let off = match layout {
        Layout::Interleaved => (cyl as u64 * nr_sides as u64 + side as u64) * trk_len,
        Layout::InterleavedSwapSides => {
            let track_index = cyl as u64 * nr_sides as u64 + side as u64;
            (track_index ^ (nr_sides as u64 - 1)) * trk_len
        }
        Layout::SequentialReverseSide1 => {
            if side == 0 {
                cyl as u64 * trk_len
            } else {
                (2 * nr_cyls as u64 - cyl as u64 - 1) * trk_len
            }
        }
    };
    off + base_off
}

/// File offset of a specific sector payload within its track, given the sector's 1-based on-disk
/// id and the track's base sector number (spec §8 seed scenario 6).
pub fn sector_payload_offset(
    trk_off: u64,
    sector_id: u8,
    base: u8,
    sec_size_code: SectorSizeCode,
) -> u64 {
    let sec_sz = crate::n_to_bytes(sec_size_code) as u64;
    trk_off + (sector_id.wrapping_sub(base)) as u64 * sec_sz
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_permutation(map: &[u8], base: u8, nr_sectors: u16) -> bool {
        let mut seen = vec![false; nr_sectors as usize];
        for &id in map {
            let offset = id.wrapping_sub(base) as usize;
            if offset >= nr_sectors as usize || seen[offset] {
                return false;
            }
            seen[offset] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn pc_1440_sector_map_is_sequential_with_interleave_one() {
        let mut map = [0u8; MAX_SEC_MAP];
        build_sec_map(&mut map, 18, 1, 0, 1, false, 0, 0);
        assert_eq!(&map[..18], &(1..=18).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn st_720k_track_11_sector_map_is_a_permutation() {
        let mut map = [0u8; MAX_SEC_MAP];
        build_sec_map(&mut map, 9, 1, 2, 1, false, 5, 11);
        assert!(is_permutation(&map[..9], 1, 9));
    }

    #[test]
    fn kaypro_inter_track_numbering_shifts_head_one_base() {
        let bases = sector_bases(1, 10, true);
        assert_eq!(bases, [1, 11]);
        let mut map = [0u8; MAX_SEC_MAP];
        build_sec_map(&mut map, 10, 3, 0, bases[1], false, 0, 1);
        assert!(is_permutation(&map[..10], 11, 10));
    }

    #[test]
    fn sequential_reverse_side1_matches_ti99_dsdd_offset() {
        let nr_cyls = 40u16;
        let trk_len = 2560u64;
        let off = track_offset(Layout::SequentialReverseSide1, 0, 1, 2, nr_cyls, trk_len, 0);
        assert_eq!(off, (2 * nr_cyls as u64 - 1) * trk_len);
    }

    #[test]
    fn sector_payload_offset_matches_seed_scenario_six() {
        // (cyl=3, side=0) of an 18-sector, 512-byte-sector PC 1.44M track, sector id 7 with base
        // 1: the track starts at sector index 6 * 18 * 512, and sector 7 is the 7th one in, i.e.
        // local index 6.
        let trk_off = (3u64 * 2 + 0) * 18 * 512;
        let off = sector_payload_offset(trk_off, 7, 1, 2);
        assert_eq!(off, trk_off + 6 * 512);
    }
}
