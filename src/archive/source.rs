// src/archive/source.rs

//! Random-access byte sources for archive reading
//!
//! The ZIP central directory sits at the end of the file, so the reader
//! needs positioned reads rather than a forward-only stream.
//! [`ByteRangeSource`] is that capability; [`RangeReader`] adapts any source
//! to `Read + Seek` for the codec.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

/// Index-addressable, read-only bytes
pub trait ByteRangeSource {
    /// Total length in bytes
    fn size(&self) -> io::Result<u64>;

    /// Read into `buf` starting at `offset`, returning the bytes read
    ///
    /// Returns 0 at or past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
}

impl ByteRangeSource for [u8] {
    fn size(&self) -> io::Result<u64> {
        Ok(<[u8]>::len(self) as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= <[u8]>::len(self) {
            return Ok(0);
        }
        let available = &self[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

impl ByteRangeSource for Vec<u8> {
    fn size(&self) -> io::Result<u64> {
        Ok(self.as_slice().len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        ByteRangeSource::read_at(self.as_slice(), offset, buf)
    }
}

impl ByteRangeSource for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// `Read + Seek` cursor over a [`ByteRangeSource`]
pub struct RangeReader<'a, S: ByteRangeSource + ?Sized> {
    source: &'a S,
    len: u64,
    position: u64,
}

impl<'a, S: ByteRangeSource + ?Sized> RangeReader<'a, S> {
    /// Create a reader positioned at the start of `source`
    pub fn new(source: &'a S) -> io::Result<Self> {
        Ok(Self {
            len: source.size()?,
            source,
            position: 0,
        })
    }
}

impl<S: ByteRangeSource + ?Sized> Read for RangeReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.position >= self.len {
            return Ok(0);
        }
        let n = self.source.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<S: ByteRangeSource + ?Sized> Seek for RangeReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(position) => {
                self.position = position;
                Ok(position)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}
