//! Track-geometry builder (spec §4.3): turns a resolved type-table entry into the byte/bitcell
//! sizes the track state machine needs to drive emission and decoding.
//!
//! No teacher file computes anything like this (fluxfox materializes whole tracks from a
//! `TrackDataStream` rather than deriving region sizes up front), so the gap-length constants
//! below are grounded instead on the well-known NEC µPD765A floppy controller's "suggested values
//! for GPL" table (the FORMAT TRACK gap-3 column for MFM, the READ/WRITE gap column for FM) and on
//! the teacher's `structure_parsers::system34` constants (`IBM_GAP2 = 22`, `IBM_GAP4A = 80`,
//! `SYNC_LEN = 12`, `IBM_GAP1 = 50`), which the spec's own MFM defaults (`22`/`80`) reproduce
//! exactly.

use crate::clock::{Clock, Rpm, Ticks};
use crate::error::{Result, TrackEngineError};
use crate::SyncMode;

/// Pre-sync byte count ahead of an MFM address mark (three `0x00` sync bytes are conventional,
/// but the controller tolerates up to this many).
pub const GAP_SYNC: u16 = 12;
/// FM's shorter pre-sync byte count.
pub const FM_GAP_SYNC: u16 = 6;
/// Post-IAM gap (GAP1) byte count.
pub const GAP_1: u16 = 50;

const MFM_GAP2_DEFAULT: u16 = 22;
const MFM_GAP4A_DEFAULT: u16 = 80;
const FM_GAP2_DEFAULT: u16 = 11;
const FM_GAP4A_DEFAULT: u16 = 16;

/// Default MFM gap3 by sector-size code, taken from the µPD765A "FORMAT TRACK" suggested gap
/// list (`N=0..3` columns 27/42/84/116; extrapolated geometrically beyond `N=3`).
const MFM_GAP3_BY_N: [u16; 7] = [27, 42, 84, 116, 150, 180, 200];
/// Default FM gap3 by sector-size code, taken from the same datasheet's READ/WRITE gap column.
const FM_GAP3_BY_N: [u16; 7] = [7, 14, 27, 42, 58, 74, 90];

pub fn default_gap3(sec_size_code: u8, sync: SyncMode) -> u16 {
    let idx = (sec_size_code as usize).min(6);
    match sync {
        SyncMode::Fm => FM_GAP3_BY_N[idx],
        _ => MFM_GAP3_BY_N[idx],
    }
}

/// Inputs resolved by the type-table matcher and header probers, before the track-geometry
/// builder derives byte/bitcell sizes from them (spec §4.3 steps 1-12).
#[derive(Copy, Clone, Debug)]
pub struct GeometryInputs {
    pub sync: SyncMode,
    pub nr_sectors: u16,
    pub sec_size_bytes: u32,
    pub sec_size_code: u8,
    pub has_iam: bool,
    pub gap_3: u16,
    pub gap_2: Option<u16>,
    pub gap_4a: Option<u16>,
    pub post_crc_syncs: u8,
    pub rpm: Rpm,
}

/// Fully-derived per-track geometry (spec §3's IMG-block derived fields).
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub gap_2: u16,
    pub gap_3: u16,
    pub gap_4a: u16,
    pub gap_4: u32,
    pub idx_sz: u32,
    pub idam_sz: u32,
    pub dam_sz_pre: u32,
    pub dam_sz_post: u32,
    pub data_rate: u16,
    pub tracklen_bc: u32,
    pub ticks_per_cell: u32,
    pub write_bc_ticks: u32,
    pub stk_per_rev: u64,
    pub long_track: bool,
}

impl Geometry {
    /// One sector's full encoded footprint — IDAM, pre-DAM sync, payload, post-DAM trailer (spec
    /// §4.3 step 7's `enc_sec_sz`). Exposed so the write path can recover a rotational slot from a
    /// raw byte offset (spec §4.5 point 4) without recomputing the formula by hand.
    pub fn enc_sec_sz(&self, sec_size_bytes: u32) -> u32 {
        self.idam_sz + self.dam_sz_pre + sec_size_bytes + self.dam_sz_post
    }
}

/// Run the track-geometry builder (spec §4.3). `clock` supplies the unit conversions; the
/// returned [`Geometry`] is immutable for the lifetime of the open track's format (spec §3:
/// "geometry is immutable after `open`").
pub fn build_geometry(inputs: GeometryInputs, clock: &dyn Clock) -> Result<Geometry> {
    if inputs.nr_sectors == 0 {
        return Err(TrackEngineError::InvalidGeometry("nr_sectors must be nonzero"));
    }

    let is_mfm = matches!(inputs.sync, SyncMode::Mfm);

    // Step 1: gap class defaults.
    let gap_2 = inputs
        .gap_2
        .unwrap_or(if is_mfm { MFM_GAP2_DEFAULT } else { FM_GAP2_DEFAULT });
    let gap_4a = inputs
        .gap_4a
        .unwrap_or(if is_mfm { MFM_GAP4A_DEFAULT } else { FM_GAP4A_DEFAULT });
    let gap_3 = inputs.gap_3;

    // Step 2: revolution period in slow ticks, scaled for the requested RPM.
    let stk_per_rev = clock.stk_ms(200) * 300 / inputs.rpm.as_u32() as Ticks;

    // Step 3: index region size.
    let idx_sz: u32 = if is_mfm {
        gap_4a as u32
            + if inputs.has_iam {
                GAP_SYNC as u32 + 4 + GAP_1 as u32
            } else {
                0
            }
    } else {
        gap_4a as u32
    };

    // Step 4: IDAM region size.
    let idam_sz: u32 = if is_mfm {
        let idam_gap_sync = gap_3.min(GAP_SYNC) as u32;
        idam_gap_sync + 8 + 2 + gap_2 as u32 + inputs.post_crc_syncs as u32
    } else {
        FM_GAP_SYNC as u32 + 5 + 2 + gap_2 as u32
    };

    // Step 5: DAM pre-data region size.
    let dam_sz_pre: u32 = if is_mfm {
        GAP_SYNC as u32 + 4
    } else {
        FM_GAP_SYNC as u32 + 1
    };

    // Step 6: post-DAM region size (CRC trailer + GAP3 + post-CRC syncs).
    let dam_sz_post: u32 = 2 + gap_3 as u32 + inputs.post_crc_syncs as u32;

    // Step 7: minimum track bitcells at the encoded layout's natural size.
    let enc_sec_sz = idam_sz + dam_sz_pre + inputs.sec_size_bytes + dam_sz_post;
    let tracklen = (enc_sec_sz * inputs.nr_sectors as u32 + idx_sz) * 16;

    // Step 8: data-rate class selection (MFM only; FM is fixed at 250 kbps).
    let (data_rate, standard_tracklen_bc) = if is_mfm {
        let base = 50_000u64 * 300 / inputs.rpm.as_u32() as u64;
        let mut chosen = (250u16, (base + 5000) as u32);
        for i in 0..3u32 {
            let threshold = (base << i) + 5000;
            if (tracklen as u64) < threshold {
                chosen = (250u16 << i, threshold as u32);
                break;
            }
            chosen = (250u16 << i, threshold as u32);
        }
        chosen
    } else {
        (250u16, tracklen)
    };

    // Step 9: standard bitcell track length for the chosen data rate.
    let mut tracklen_bc =
        data_rate as u64 * 60_000 / inputs.rpm.as_u32() as u64;

    // Step 10: long-track handling.
    let mut long_track = false;
    if tracklen as u64 > tracklen_bc {
        // Try dropping GAP4A first.
        let without_gap4a = tracklen.saturating_sub(gap_4a as u32 * 16);
        if (without_gap4a as u64) <= tracklen_bc {
            // Fits once GAP4A is trimmed; nothing further to do (tracklen_bc unchanged).
        } else {
            tracklen_bc = tracklen as u64 + 100;
            long_track = true;
        }
    }
    let _ = standard_tracklen_bc;

    // Step 11: round up to a multiple of 32.
    let tracklen_bc = ((tracklen_bc as u32) + 31) / 32 * 32;

    // Step 12: ticks per cell, GAP4 slack, write-bitcell ticks.
    let ticks_per_cell = (clock.stk_sysclk(stk_per_rev) * 16 / tracklen_bc as u64) as u32;
    let gap_4 = tracklen_bc.saturating_sub(tracklen).wrapping_div(16);
    let write_bc_ticks = (clock.sysclk_ms(1) / data_rate as u64) as u32;

    Ok(Geometry {
        gap_2,
        gap_3,
        gap_4a,
        gap_4,
        idx_sz,
        idam_sz,
        dam_sz_pre,
        dam_sz_post,
        data_rate,
        tracklen_bc,
        ticks_per_cell,
        write_bc_ticks,
        stk_per_rev,
        long_track,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;

    fn pc_1440_inputs() -> GeometryInputs {
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
        }
    }

    #[test]
    fn tracklen_bc_is_multiple_of_32_and_covers_encoded_layout() {
        let clock = TestClock::new(72_000_000, 72_000);
        let geom = build_geometry(pc_1440_inputs(), &clock).unwrap();
        assert_eq!(geom.tracklen_bc % 32, 0);
        assert_eq!(geom.data_rate, 500);
    }

    #[test]
    fn gap_4_is_never_negative() {
        let clock = TestClock::new(72_000_000, 72_000);
        let geom = build_geometry(pc_1440_inputs(), &clock).unwrap();
        assert!(geom.tracklen_bc >= geom.gap_4 * 16);
    }

    #[test]
    fn zero_sectors_is_rejected() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut inputs = pc_1440_inputs();
        inputs.nr_sectors = 0;
        assert!(build_geometry(inputs, &clock).is_err());
    }

    #[test]
    fn fm_is_always_250_kbps() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut inputs = pc_1440_inputs();
        inputs.sync = SyncMode::Fm;
        inputs.nr_sectors = 26;
        inputs.sec_size_bytes = 128;
        inputs.sec_size_code = 0;
        inputs.gap_3 = 7;
        let geom = build_geometry(inputs, &clock).unwrap();
        assert_eq!(geom.data_rate, 250);
    }
}
