//! Random-access storage underneath a SquashFS.
//!
//! Everything above this module reads the image through [`ReadAt`], which takes `&self` so a
//! single source can serve many file handles at once. Sources that are naturally positioned
//! (`std::fs::File`, byte buffers) implement it directly. Anything that only offers `Read + Seek`
//! is wrapped in a [`ReaderMux`], which serializes access and skips the seek when consecutive
//! reads are contiguous.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::Mutex;

/// Positioned reads against an immutable byte source.
pub trait ReadAt {
    /// Read up to `buf.len()` bytes starting at `offset`, returning how many were read. Returns
    /// `Ok(0)` only at the end of the source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Fill `buf` entirely from `offset`, failing with `UnexpectedEof` if the source ends first
    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// The source [`SquashFS::open`](super::SquashFS::open) reads from: the file itself where the
/// platform has positioned reads, otherwise the file behind a [`ReaderMux`]
#[cfg(any(unix, windows))]
pub type FileSource = std::fs::File;
#[cfg(not(any(unix, windows)))]
pub type FileSource = ReaderMux<std::fs::File>;

#[cfg(any(unix, windows))]
pub(crate) fn file_source(file: std::fs::File) -> FileSource {
    file
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn file_source(file: std::fs::File) -> FileSource {
    ReaderMux::new(file)
}

#[cfg(unix)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for std::fs::File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let start = match usize::try_from(offset) {
            Ok(o) if o < self.len() => o,
            _ => return Ok(0),
        };
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Shares one `Read + Seek` source between every reader of a SquashFS. Reads are serialized by
/// a mutex; the source is only re-seeked when a read does not continue where the previous one
/// stopped.
#[derive(Debug)]
pub struct ReaderMux<R> {
    inner: Mutex<SharedReader<R>>,
}

#[derive(Debug)]
struct SharedReader<R> {
    inner: R,
    pos: Option<u64>,
}

impl<R> ReaderMux<R>
where R: Read + Seek
{
    pub fn new(reader: R) -> Self {
        Self {
            inner: Mutex::new(SharedReader { inner: reader, pos: None }),
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner().inner
    }
}

impl<R> SharedReader<R>
where R: Seek
{
    fn activate(&mut self, offset: u64) -> io::Result<()> {
        if self.pos != Some(offset) {
            self.pos = None;
            let new_pos = self.inner.seek(SeekFrom::Start(offset))?;
            if new_pos != offset {
                return Err(io::Error::new(io::ErrorKind::Other, "seek landed at wrong offset"));
            }
            self.pos = Some(offset);
        }
        Ok(())
    }
}

impl<R> ReadAt for ReaderMux<R>
where R: Read + Seek
{
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut sr = self.inner.lock();
        sr.activate(offset)?;
        match sr.inner.read(buf) {
            Ok(size) => {
                sr.pos = Some(offset + size as u64);
                Ok(size)
            },
            Err(e) => {
                sr.pos = None;
                Err(e)
            },
        }
    }
}
