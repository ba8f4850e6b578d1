use std::cmp::min;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use log::trace;

use super::error::{Error, Result};
use super::metadata::{FragmentEntry, Inode};
use super::readermux::ReadAt;
use super::squashfs::SquashFS;

/// Reader for uncompressed file data from a series of compressed blocks and possibly a tail-end
/// stored in a fragment block.
///
/// The handle presents a single contiguous stream to the caller. Block `i` of the file covers
/// bytes `i * block_size ..` of its contents; blocks are located by summing the on-disk sizes of
/// the blocks before them. A file whose tail was packed into a fragment has one fewer explicit
/// block, and the tail is read from `offset ..` of the fragment block.
///
/// Blocks come from the filesystem's shared cache. The most recently used block is also held by
/// the handle itself so that small sequential reads do not touch the shared cache at all.
pub struct File<'a, R> {
    sqfs: &'a SquashFS<R>,
    inode: Arc<Inode>,
    file_size: u64,
    block_positions: Vec<u64>,
    fragment: Option<(FragmentEntry, u32)>,
    pos: u64,
    last_block: Option<(u64, Arc<[u8]>)>,
    closed: bool,
}

impl<'a, R: ReadAt> File<'a, R> {
    pub(crate) fn new(sqfs: &'a SquashFS<R>, inode: Arc<Inode>) -> Result<Self> {
        let info = inode.file_layout().ok_or(Error::NotARegularFile)?;

        let mut block_positions = Vec::with_capacity(info.block_sizes.len());
        let mut position = info.blocks_start;
        for b in &info.block_sizes {
            block_positions.push(position);
            position = position.checked_add(b.disk_size().into()).ok_or_else(|| {
                Error::MalformedInode(format!("blocks of inode {} overflow the image", inode.inode_number()))
            })?;
        }

        let fragment = match info.fragment {
            Some(f) => Some((sqfs.fragment(f.index)?, f.offset)),
            None => None,
        };
        let file_size = info.file_size;
        drop(info);

        Ok(Self {
            sqfs,
            inode,
            file_size,
            block_positions,
            fragment,
            pos: 0,
            last_block: None,
            closed: false,
        })
    }

    /// Size of the file contents in bytes
    pub fn len(&self) -> u64 {
        self.file_size
    }

    pub fn is_empty(&self) -> bool {
        self.file_size == 0
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    /// Current read position
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// End the read session. Every later operation fails with [`Error::HandleClosed`].
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::HandleClosed);
        }
        self.closed = true;
        self.last_block = None;
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed { Err(Error::HandleClosed) } else { Ok(()) }
    }

    /// Read from the current position, returning `Ok(0)` only at end of file
    pub fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let size = self.file_size;
        if self.pos >= size || buf.is_empty() {
            return Ok(0);
        }
        let n = min(buf.len() as u64, size - self.pos) as usize;
        let block_size = u64::from(self.sqfs.block_size());

        let mut copied = 0;
        while copied < n {
            let pos = self.pos + copied as u64;
            let index = pos / block_size;
            let within = (pos % block_size) as usize;
            let want = min(n - copied, block_size as usize - within);
            let got = self.copy_from_block(index, within, &mut buf[copied..copied + want])?;
            if got == 0 {
                break;
            }
            copied += got;
        }
        if copied == 0 {
            return Err(Error::Internal("read produced no data before end of file"));
        }
        self.pos += copied as u64;
        Ok(copied)
    }

    // Number of content bytes block `index` holds
    fn block_len(&self, index: u64) -> usize {
        let block_size = u64::from(self.sqfs.block_size());
        min(block_size, self.file_size - index * block_size) as usize
    }

    fn copy_from_block(&mut self, index: u64, within: usize, dest: &mut [u8]) -> Result<usize> {
        // Sparse blocks have no data on disk and never enter a cache
        if self.inode.block_sizes().get(index as usize).is_some_and(|b| b.is_sparse()) {
            dest.fill(0);
            return Ok(dest.len());
        }
        let data = self.load_block(index)?;

        let start = match (self.inode.block_sizes().get(index as usize), self.fragment) {
            (Some(_), _) => within,
            (None, Some((_, offset))) => offset as usize + within,
            (None, None) => return Err(Error::Internal("no block or fragment covers read position")),
        };
        let end = start + dest.len();
        if end > data.len() {
            return Err(Error::corrupt(self.block_position(index), format!(
                "block holds {} bytes, file needs {end}", data.len()
            )));
        }
        dest.copy_from_slice(&data[start..end]);
        Ok(dest.len())
    }

    fn block_position(&self, index: u64) -> u64 {
        match self.block_positions.get(index as usize) {
            Some(p) => *p,
            None => self.fragment.map_or(0, |(f, _)| f.start),
        }
    }

    /// Decompressed contents of block `index`, which is the fragment block when `index` is past
    /// the explicit blocks
    fn load_block(&mut self, index: u64) -> Result<Arc<[u8]>> {
        if let Some((last, data)) = &self.last_block {
            if *last == index {
                return Ok(Arc::clone(data));
            }
        }

        let store = self.sqfs.store();
        let data = match self.inode.block_sizes().get(index as usize) {
            Some(b) => {
                let position = self.block_positions[index as usize];
                trace!("inode {}: block {index} at {position}", self.inode.inode_number());
                let data = store.data_block(position, *b)?;
                let expected = self.block_len(index);
                if data.len() < expected {
                    return Err(Error::corrupt(position, format!(
                        "block decompressed to {} bytes, expected {expected}", data.len()
                    )));
                }
                data
            },
            None => {
                let (entry, _) = self.fragment
                    .ok_or(Error::Internal("no block or fragment covers read position"))?;
                trace!("inode {}: fragment at {}", self.inode.inode_number(), entry.start);
                store.data_block(entry.start, entry.size)?
            },
        };
        self.last_block = Some((index, Arc::clone(&data)));
        Ok(data)
    }

    /// Move the read position. Positions past the end are allowed and read as end of file.
    pub fn seek_to(&mut self, pos: SeekFrom) -> Result<u64> {
        self.check_open()?;
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => self.file_size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        self.pos = target.ok_or(Error::SeekBeforeStart)?;
        Ok(self.pos)
    }
}

impl<'a, R: ReadAt> Read for File<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_bytes(buf)?)
    }
}

impl<'a, R: ReadAt> Seek for File<'a, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_to(pos)?)
    }
}

impl<'a, R> Write for File<'a, R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(Error::ReadOnlyFilesystem.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a, R> fmt::Debug for File<'a, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("inode_number", &self.inode.inode_number())
            .field("size", &self.file_size)
            .field("blocks", &self.inode.block_sizes().len())
            .field("fragment", &self.fragment)
            .field("pos", &self.pos)
            .field("closed", &self.closed)
            .finish()
    }
}
