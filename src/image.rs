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

//! The top-level image handle (spec §3, §6 "Handler vtable").
//!
//! Grounded on the teacher crate's `DiskImage` (the single owning type a host mounts and drives
//! through a small fixed set of entry points) but narrowed to this engine's synchronous,
//! single-file, single-track-at-a-time model (spec §5: "only one image file is open at a time").
//! Where the teacher dispatches between container formats through a `DiskImageFileFormat` enum
//! plus trait objects, this engine has exactly two mutually exclusive format blocks (spec §3), so
//! [`OpenedImage`] from [`crate::dispatch`] is matched directly rather than boxed behind a trait.
//!
//! One deliberate departure from a literal reading of spec §3: the IMG and HFE families do not
//! share a single `read_bc` ring type. IMG's track state machine (§4.5) already emits fully
//! clocked 16-bit cell words, while HFE's engine (§4.6) emits raw bytes that still need the
//! `rdata_flux` stage to become tick-interval flux events. Forcing both through one `SpscRing<T>`
//! would mean picking a lowest-common-denominator `T` neither format actually produces; instead
//! [`FormatRings`] carries the ring set each format needs, selected by the same match that selects
//! the format block itself.

use crate::clock::Clock;
use crate::codec::fm::Fm;
use crate::codec::mfm::Mfm;
use crate::config::CustomTable;
use crate::dispatch::{self, OpenedImage};
use crate::error::{Result, TrackEngineError};
use crate::host::HostProfile;
use crate::io_handle::FileHandle;
use crate::random::RandomSource;
use crate::ring::{SpscRing, WriteDescriptor, WriteDescriptorQueue};
use crate::SyncMode;

/// Ring-buffer set for the active format (spec §3: "two ring buffers (`read_data`, `read_bc`) and
/// two for writing (`write_data`, `write_bc`)", specialized per format as described in the module
/// doc comment above).
pub enum FormatRings {
    Img {
        read_bc: SpscRing<u16>,
        write_bc: SpscRing<u16>,
    },
    Hfe {
        read_data: SpscRing<u8>,
        read_bc: SpscRing<u32>,
        write_data: SpscRing<u8>,
    },
}

impl FormatRings {
    fn for_opened(opened: &OpenedImage, capacity: usize) -> Self {
        match opened {
            OpenedImage::Img(_) => FormatRings::Img {
                read_bc: SpscRing::new(capacity),
                write_bc: SpscRing::new(capacity),
            },
            OpenedImage::Hfe(_) => FormatRings::Hfe {
                read_data: SpscRing::new(capacity),
                read_bc: SpscRing::new(capacity),
                write_data: SpscRing::new(capacity),
            },
        }
    }

    fn reset(&self) {
        match self {
            FormatRings::Img { read_bc, write_bc } => {
                read_bc.reset();
                write_bc.reset();
            }
            FormatRings::Hfe { read_data, read_bc, write_data } => {
                read_data.reset();
                read_bc.reset();
                write_data.reset();
            }
        }
    }
}

/// The engine's single owning handle (spec §3 "Image handle"). One instance exists per mount.
pub struct ImageHandle {
    file: Box<dyn FileHandle>,
    host: HostProfile,
    opened: OpenedImage,
    rings: FormatRings,
    /// Pending host write windows awaiting consumption (spec §3: "a pair of write descriptors
    /// `{start_tick, bc_end}` in a small SPSC array"); `len()`/`free()` on this ring stand in for
    /// the spec's separately-named `wr_bc`/`wr_cons` indices.
    write_descriptors: WriteDescriptorQueue,
    cur_cyl: u16,
    cur_side: u8,
}

impl ImageHandle {
    /// Mount an image (spec §6 handler vtable `open`). `ring_capacity` sizes all four data rings
    /// and is rounded up to a power of two by [`SpscRing::new`].
    pub fn open(
        file: Box<dyn FileHandle>,
        host: HostProfile,
        clock: &dyn Clock,
        ring_capacity: usize,
    ) -> Result<Self> {
        Self::open_with_overrides(file, host, clock, ring_capacity, None)
    }

    /// As [`Self::open`], but consults a caller-supplied `IMG.CFG`-equivalent table (see
    /// [`crate::config::CustomTable`]) ahead of the host's compiled type table.
    pub fn open_with_overrides(
        mut file: Box<dyn FileHandle>,
        host: HostProfile,
        clock: &dyn Clock,
        ring_capacity: usize,
        overrides: Option<&CustomTable>,
    ) -> Result<Self> {
        let opened = dispatch::open_with_overrides(&mut *file, host, clock, overrides)?;
        let rings = FormatRings::for_opened(&opened, ring_capacity);
        Ok(ImageHandle {
            file,
            host,
            opened,
            rings,
            write_descriptors: WriteDescriptorQueue::new(4),
            cur_cyl: 0,
            cur_side: 0,
        })
    }

    pub fn host(&self) -> HostProfile {
        self.host
    }

    pub fn current_track(&self) -> (u16, u8) {
        (self.cur_cyl, self.cur_side)
    }

    /// Linear track index `cyl*nr_sides + side` (spec §3: `cur_track = cyl*2 + side`).
    pub fn cur_track_index(&self) -> u32 {
        let nr_sides = match &self.opened {
            OpenedImage::Img(block) => block.nr_sides(),
            OpenedImage::Hfe(block) => block.nr_sides,
        };
        self.cur_cyl as u32 * nr_sides as u32 + self.cur_side as u32
    }

    pub fn rings(&self) -> &FormatRings {
        &self.rings
    }

    pub fn write_descriptors(&self) -> &WriteDescriptorQueue {
        &self.write_descriptors
    }

    /// Publish a new host write burst's `{start_tick, bc_end}` (spec §3's write-descriptor SPSC
    /// array). The hosting write-gate ISR calls this once per discrete write window it opens;
    /// [`Self::write_track`] drains the queue so a DAM arriving with no locked IDAM (a format-style
    /// write, spec §4.5 point 4) can still be placed. Returns `false` if the queue is full.
    pub fn begin_write(&self, descriptor: WriteDescriptor) -> bool {
        self.write_descriptors.push(descriptor)
    }

    /// Pre-grow a blank image to its full expected size before the first write (spec §6 handler
    /// vtable `extend`, optional: "called by the hosting mount layer to pre-grow empty images
    /// (TRD, SSD, DSD)"). A no-op for HFE, whose bitstream files are already their final size.
    pub fn extend(&mut self) -> Result<()> {
        let total = match &self.opened {
            OpenedImage::Img(block) => {
                let sec_sz = crate::n_to_bytes(block.sec_size_code) as u64;
                block.nr_cyls() as u64 * block.nr_sides() as u64 * block.nr_sectors as u64 * sec_sz
            }
            OpenedImage::Hfe(_) => return Ok(()),
        };
        let current = self.file.size()?;
        if current < total {
            self.file.seek(current)?;
            let zeros = vec![0u8; (total - current) as usize];
            self.file.write(&zeros)?;
        }
        Ok(())
    }

    /// Seek to a new (cylinder, head) position (spec §6 handler vtable `setup_track`). Resets both
    /// rings and abandons any mid-phase decode state (spec §5: "a track change resets both ring
    /// buffers' prod=cons=0 and abandons any mid-phase state").
    pub fn setup_track(&mut self, cyl: u16, side: u8) -> Result<()> {
        match &mut self.opened {
            OpenedImage::Img(block) => {
                let sec_sz = crate::n_to_bytes(block.sec_size_code) as u64;
                let trk_len = block.nr_sectors as u64 * sec_sz;
                block.on_track_change(cyl, side, trk_len);
            }
            OpenedImage::Hfe(block) => {
                let track = cyl * block.nr_sides as u16 + side as u16;
                block.seek_track(&mut *self.file, track)?;
            }
        }
        self.rings.reset();
        self.write_descriptors.reset();
        self.cur_cyl = cyl;
        self.cur_side = side;
        Ok(())
    }

    /// Drive the read path as far as ring space allows (spec §6 handler vtable `read_track`).
    pub fn read_track(&mut self) -> Result<()> {
        match (&mut self.opened, &self.rings) {
            (OpenedImage::Img(block), FormatRings::Img { read_bc, .. }) => {
                if matches!(block.sync, SyncMode::Fm) {
                    block.read_track(&Fm, &mut *self.file, read_bc)
                } else {
                    block.read_track(&Mfm, &mut *self.file, read_bc)
                }
            }
            (OpenedImage::Hfe(block), FormatRings::Hfe { read_data, .. }) => {
                block.read_track(&mut *self.file, self.cur_side, read_data)
            }
            _ => unreachable!("FormatRings always matches the active OpenedImage variant"),
        }
    }

    /// HFE-only: convert the raw byte stream populated by [`Self::read_track`] into timed flux
    /// intervals (spec §6 handler vtable `rdata_flux`). IMG has no equivalent stage since its
    /// track state machine already emits clocked cell words directly into `read_bc`.
    pub fn rdata_flux<R: RandomSource>(&mut self, rng: &mut R) -> Result<()> {
        match (&mut self.opened, &self.rings) {
            (OpenedImage::Hfe(block), FormatRings::Hfe { read_data, read_bc, .. }) => {
                block.rdata_flux(read_data, read_bc, rng);
                Ok(())
            }
            (OpenedImage::Img(_), _) => Err(TrackEngineError::Parameter(
                "rdata_flux is only meaningful for pre-encoded (HFE) images",
            )),
            _ => unreachable!("FormatRings always matches the active OpenedImage variant"),
        }
    }

    /// Consume host-written bitcells and commit completed sectors/blocks to the file (spec §6
    /// handler vtable `write_track`).
    pub fn write_track(&mut self) -> Result<()> {
        if let OpenedImage::Img(block) = &mut self.opened {
            while let Some(descriptor) = self.write_descriptors.pop() {
                block.note_write_start(descriptor.start_tick);
            }
        }
        match (&mut self.opened, &self.rings) {
            (OpenedImage::Img(block), FormatRings::Img { write_bc, .. }) => {
                if matches!(block.sync, SyncMode::Fm) {
                    block.write_track(&Fm, &mut *self.file, write_bc)
                } else {
                    block.write_track(&Mfm, &mut *self.file, write_bc)
                }
            }
            (OpenedImage::Hfe(block), FormatRings::Hfe { write_data, .. }) => {
                block.write_track(&mut *self.file, self.cur_side, write_data)
            }
            _ => unreachable!("FormatRings always matches the active OpenedImage variant"),
        }
    }

    /// HFE-only: flush the dirty write window to the file (spec §3 "a batched I/O window
    /// `{off, len, dirty}`"). IMG commits each sector as soon as its DAM CRC validates, so it has
    /// no equivalent deferred flush.
    pub fn flush(&mut self) -> Result<()> {
        match &mut self.opened {
            OpenedImage::Hfe(block) => block.flush(&mut *self.file),
            OpenedImage::Img(_) => Ok(()),
        }
    }

    pub fn capabilities(&self) -> dispatch::FormatCaps {
        self.opened.caps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::io_handle::StdFileHandle;
    use crate::random::default_source;
    use std::io::Cursor;

    fn pc_1440_image() -> Box<dyn FileHandle> {
        Box::new(StdFileHandle::new(Cursor::new(vec![0u8; 80 * 2 * 18 * 512])))
    }

    #[test]
    fn opens_and_seeks_a_raw_pc_image() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        handle.setup_track(3, 0).unwrap();
        assert_eq!(handle.current_track(), (3, 0));
        assert_eq!(handle.cur_track_index(), 6);
    }

    #[test]
    fn read_track_populates_the_img_bitcell_ring() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 4096).unwrap();
        handle.setup_track(0, 0).unwrap();
        handle.read_track().unwrap();
        match handle.rings() {
            FormatRings::Img { read_bc, .. } => assert!(!read_bc.is_empty()),
            FormatRings::Hfe { .. } => panic!("expected IMG rings"),
        }
    }

    #[test]
    fn rdata_flux_rejects_img_images() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        let mut rng = default_source();
        assert!(handle.rdata_flux(&mut rng).is_err());
    }

    #[test]
    fn open_with_overrides_resolves_a_size_no_builtin_table_claims() {
        use crate::config::CustomTable;
        use crate::type_table::RawEntry;

        let clock = TestClock::new(72_000_000, 72_000);
        let file_size = 40u64 * 4 * 512;
        let file = Box::new(StdFileHandle::new(Cursor::new(vec![0u8; file_size as usize])));
        let rows = [RawEntry::new(4, 1, true, 40, 1, 2, 1, false, 0, false, false)];
        let overrides = CustomTable::new(&rows);
        let handle =
            ImageHandle::open_with_overrides(file, HostProfile::Default, &clock, 64, Some(&overrides))
                .unwrap();
        assert!(handle.capabilities().contains(dispatch::FormatCaps::SECTOR_SYNTHESIS));
    }

    #[test]
    fn capabilities_report_sector_synthesis_for_a_raw_image() {
        let clock = TestClock::new(72_000_000, 72_000);
        let handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        assert!(handle.capabilities().contains(dispatch::FormatCaps::SECTOR_SYNTHESIS));
    }

    #[test]
    fn write_track_drains_queued_write_descriptors() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        handle.setup_track(0, 0).unwrap();
        assert!(handle.begin_write(WriteDescriptor { start_tick: 1234, bc_end: 0 }));
        assert_eq!(handle.write_descriptors().len(), 1);
        handle.write_track().unwrap();
        assert_eq!(handle.write_descriptors().len(), 0);
    }

    #[test]
    fn setup_track_resets_pending_write_descriptors() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        handle.setup_track(0, 0).unwrap();
        handle.begin_write(WriteDescriptor { start_tick: 1, bc_end: 0 });
        handle.setup_track(1, 0).unwrap();
        assert_eq!(handle.write_descriptors().len(), 0);
    }

    #[test]
    fn extend_is_a_no_op_once_an_image_already_matches_its_full_size() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut handle = ImageHandle::open(pc_1440_image(), HostProfile::Default, &clock, 64).unwrap();
        let before = handle.file.size().unwrap();
        handle.extend().unwrap();
        assert_eq!(handle.file.size().unwrap(), before);
    }

    #[test]
    fn extend_is_a_no_op_for_hfe_images() {
        let clock = TestClock::new(72_000_000, 72_000);
        let mut image = vec![0u8; 512];
        image[0..8].copy_from_slice(crate::hfe::MAGIC_V1);
        image[8] = 0;
        image[9] = 1;
        image[10] = 1;
        image[11] = 0;
        image[12..14].copy_from_slice(&250u16.to_le_bytes());
        image[14..16].copy_from_slice(&300u16.to_le_bytes());
        image[18] = 1;
        let file = Box::new(StdFileHandle::new(Cursor::new(image)));
        let mut handle = ImageHandle::open(file, HostProfile::Default, &clock, 64).unwrap();
        let before = handle.file.size().unwrap();
        handle.extend().unwrap();
        assert_eq!(handle.file.size().unwrap(), before);
    }
}
