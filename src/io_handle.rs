//! The block-oriented file handle contract (spec §6).
//!
//! The teacher crate abstracts over host I/O with its own `io::{ReadSeek, ReadWriteSeek}` marker
//! traits (blanket-implemented over anything that is `Read + Seek` / `Read + Write + Seek`) so the
//! file parsers never care whether they are handed a `File` or an in-memory `Cursor`. This engine
//! narrows that same idea to the five synchronous primitives the spec actually names: positioned
//! `size`/`seek`/`read`/`write`/`sync`, plus a `die` hook for the unrecoverable-I/O-error path
//! (spec §7, "I/O-fatal ... `die()` aborts to the hosting layer") that a `Read`/`Seek` blanket impl
//! has no room for.

use crate::error::{Result, TrackEngineError};

/// A positioned, synchronous file handle. One image file is open at a time (spec §5) and is not
/// shared with any other subsystem.
pub trait FileHandle {
    /// Total size of the underlying file in bytes.
    fn size(&mut self) -> Result<u64>;

    /// Move the file position to `offset` bytes from the start.
    fn seek(&mut self, offset: u64) -> Result<()>;

    /// Read exactly `buf.len()` bytes at the current position, advancing it.
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Write exactly `buf.len()` bytes at the current position, advancing it.
    fn write(&mut self, buf: &[u8]) -> Result<()>;

    /// Flush any buffered writes to the backing medium.
    fn sync(&mut self) -> Result<()>;

    /// Called on an unrecoverable I/O error (disk full, media removed). The hosting layer decides
    /// how to surface `code` to the user; this call does not return control to the engine.
    fn die(&mut self, code: i32) -> ! {
        panic!("file handle reported unrecoverable I/O error (code {code})");
    }
}

/// A [`FileHandle`] backed by anything that is `Read + Write + Seek`, for host environments with a
/// standard filesystem (primarily test fixtures; firmware hosts implement [`FileHandle`] directly
/// against their FAT stack).
pub struct StdFileHandle<T> {
    inner: T,
}

impl<T> StdFileHandle<T> {
    pub fn new(inner: T) -> Self {
        StdFileHandle { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> FileHandle for StdFileHandle<T>
where
    T: std::io::Read + std::io::Write + std::io::Seek,
{
    fn size(&mut self) -> Result<u64> {
        let cur = self.inner.stream_position()?;
        let end = self.inner.seek(std::io::SeekFrom::End(0))?;
        self.inner.seek(std::io::SeekFrom::Start(cur))?;
        Ok(end)
    }

    fn seek(&mut self, offset: u64) -> Result<()> {
        self.inner.seek(std::io::SeekFrom::Start(offset))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .map_err(|_| TrackEngineError::SeekError)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn std_handle_round_trips_through_seek() {
        let mut handle = StdFileHandle::new(Cursor::new(vec![0u8; 16]));
        handle.seek(4).unwrap();
        handle.write(&[1, 2, 3, 4]).unwrap();
        handle.seek(4).unwrap();
        let mut buf = [0u8; 4];
        handle.read(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(handle.size().unwrap(), 16);
    }
}
