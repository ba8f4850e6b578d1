use std::io::{self, Read};
use std::sync::Arc;

use byteorder::{ByteOrder, LittleEndian};

use super::cache::{BlockCache, CachedBlock};
use super::error::{Error, Result};
use super::metadata::{BlockSize, EntryReference};
use super::readermux::ReadAt;
use super::superblock::Compressor;

/// SquashFS Metadata block size is fixed by the on-disk format
pub(crate) const METADATA_BLOCK_SIZE: usize = 8192;

/// Every block of an image (metadata, data and fragment) is read through this store. It applies
/// the image's base offset, decompresses, and keeps the results in one shared [`BlockCache`].
#[derive(Debug)]
pub(crate) struct BlockStore<R> {
    reader: R,
    base: u64,
    bytes_used: u64,
    compressor: Compressor,
    block_size: u32,
    cache: BlockCache,
}

impl<R: ReadAt> BlockStore<R> {
    pub fn new(reader: R, base: u64, bytes_used: u64, compressor: Compressor, block_size: u32, cache_capacity: usize) -> Self {
        Self {
            reader,
            base,
            bytes_used,
            compressor,
            block_size,
            cache: BlockCache::new(cache_capacity),
        }
    }

    pub fn cache(&self) -> &BlockCache {
        &self.cache
    }

    pub fn bytes_used(&self) -> u64 {
        self.bytes_used
    }

    /// Fill `buf` from `position` (relative to the start of the image), uncompressed and uncached
    pub fn read_raw(&self, position: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self.base.checked_add(position)
            .ok_or_else(|| Error::corrupt(position, "position overflows image offset"))?;
        self.reader.read_exact_at(buf, offset)
            .map_err(|source| Error::Io { offset: position, source })
    }

    /// The metadata block at `position` and the number of bytes it occupies on disk, including
    /// its two byte header
    pub fn metadata_block(&self, position: u64) -> Result<CachedBlock> {
        self.cache.get(position, || {
            let mut header = [0u8; 2];
            self.read_raw(position, &mut header)?;

            // The size of metadata blocks is stored in a 16-bit header
            let header = LittleEndian::read_u16(&header);
            let size = usize::from(header & 0x7FFF);
            let compressed = header & 0x8000 == 0;
            if size > METADATA_BLOCK_SIZE {
                return Err(Error::corrupt(position, format!("metadata block of {size} bytes")));
            }

            let mut raw = vec![0u8; size];
            self.read_raw(position + 2, &mut raw)?;
            let data = if compressed {
                self.compressor.decompress(&raw, METADATA_BLOCK_SIZE, position)?
            } else {
                raw
            };
            Ok((data, size as u32 + 2))
        })
    }

    /// The decompressed data or fragment block at `position`. Sparse blocks are never read from
    /// here; callers synthesize them.
    pub fn data_block(&self, position: u64, size: BlockSize) -> Result<Arc<[u8]>> {
        let disk_size = size.disk_size();
        if disk_size > self.block_size {
            return Err(Error::corrupt(position, format!(
                "on-disk size {disk_size} exceeds block size {}", self.block_size
            )));
        }
        let (data, _) = self.cache.get(position, || {
            let mut raw = vec![0u8; disk_size as usize];
            self.read_raw(position, &mut raw)?;
            let data = if size.is_compressed() {
                self.compressor.decompress(&raw, self.block_size as usize, position)?
            } else {
                raw
            };
            Ok::<_, Error>((data, disk_size))
        })?;
        Ok(data)
    }

    /// A reader over the metadata stream of the table starting at `table_start`, positioned at
    /// `entry`
    pub fn metadata_reader(&self, table_start: u64, entry: EntryReference) -> Result<MetadataReader<'_, R>> {
        MetadataReader::new(self, table_start, entry)
    }
}

/// Reads a metadata stream, rolling into the following block whenever the current one is
/// exhausted.
pub(crate) struct MetadataReader<'a, R> {
    store: &'a BlockStore<R>,
    section_start: u64,
    block_addr: u64,
    block: Arc<[u8]>,
    offset: usize,
    next_block_addr: u64,
}

impl<'a, R: ReadAt> MetadataReader<'a, R> {
    fn new(store: &'a BlockStore<R>, section_start: u64, entry: EntryReference) -> Result<Self> {
        let block_addr = section_start + entry.location();
        let (block, disk_size) = store.metadata_block(block_addr)?;
        let mut reader = Self {
            store,
            section_start,
            block_addr,
            block,
            offset: 0,
            next_block_addr: block_addr + u64::from(disk_size),
        };
        reader.set_offset(entry.offset())?;
        Ok(reader)
    }

    fn set_offset(&mut self, offset: u16) -> Result<()> {
        let offset = usize::from(offset);
        if offset > self.block.len() {
            return Err(Error::corrupt(self.block_addr, format!(
                "offset {offset} past end of {}-byte metadata block", self.block.len()
            )));
        }
        self.offset = offset;
        Ok(())
    }

    fn load(&mut self, block_addr: u64) -> Result<()> {
        let (block, disk_size) = self.store.metadata_block(block_addr)?;
        self.block_addr = block_addr;
        self.block = block;
        self.offset = 0;
        self.next_block_addr = block_addr + u64::from(disk_size);
        Ok(())
    }

    /// Jump to another entry of the same table
    pub fn seek_ref(&mut self, entry: EntryReference) -> Result<()> {
        let block_addr = self.section_start + entry.location();
        if block_addr != self.block_addr {
            self.load(block_addr)?;
        }
        self.set_offset(entry.offset())
    }
}

impl<'a, R: ReadAt> Read for MetadataReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.offset >= self.block.len() {
            // This must be the end of the block. Continue with the next one.
            self.load(self.next_block_addr)?;
        }
        let n = buf.len().min(self.block.len() - self.offset);
        buf[..n].copy_from_slice(&self.block[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::ReadBytesExt;

    // An uncompressed metadata block: header with bit 15 set, then the raw bytes
    pub(crate) fn raw_metadata_block(data: &[u8]) -> Vec<u8> {
        let mut b = (0x8000u16 | data.len() as u16).to_le_bytes().to_vec();
        b.extend_from_slice(data);
        b
    }

    fn store(image: Vec<u8>) -> BlockStore<Vec<u8>> {
        let len = image.len() as u64;
        BlockStore::new(image, 0, len, Compressor::Gzip, 4096, 8)
    }

    #[test]
    fn test_metadata_reader_spans_blocks() {
        let first: Vec<u8> = (0..100u8).collect();
        let second: Vec<u8> = (100..200u8).collect();
        let mut image = raw_metadata_block(&first);
        image.extend(raw_metadata_block(&second));
        let store = store(image);

        let mut r = store.metadata_reader(0, EntryReference::new(0, 96)).unwrap();
        let mut buf = [0u8; 8];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [96, 97, 98, 99, 100, 101, 102, 103]);
        assert_eq!(store.cache().positions(), vec![0, 102]);

        r.seek_ref(EntryReference::new(102, 98)).unwrap();
        assert_eq!(r.read_u16::<LittleEndian>().unwrap(), u16::from_le_bytes([198, 199]));
        // Running off the last block is an I/O error, not a silent end of stream
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn test_metadata_offset_past_block() {
        let store = store(raw_metadata_block(&[0; 10]));
        let err = store.metadata_reader(0, EntryReference::new(0, 11)).err().unwrap();
        assert!(matches!(err, Error::CorruptBlock { position: 0, .. }));
    }

    #[test]
    fn test_oversized_metadata_header() {
        let mut image = (0x8000u16 | 8193).to_le_bytes().to_vec();
        image.resize(9000, 0);
        let store = store(image);
        assert!(matches!(store.metadata_block(0), Err(Error::CorruptBlock { .. })));
        assert!(store.cache().is_empty());
    }

    #[test]
    fn test_uncompressed_data_block() {
        let mut image = vec![0u8; 16];
        image.extend((0..64u8).collect::<Vec<_>>());
        let store = store(image);
        let data = store.data_block(16, BlockSize::from_raw(1 << 24 | 64)).unwrap();
        assert_eq!(data.len(), 64);
        assert_eq!(data[63], 63);
        assert!(store.cache().contains(16));
    }

    #[test]
    fn test_data_block_larger_than_block_size() {
        let store = store(vec![0u8; 8192]);
        let err = store.data_block(0, BlockSize::from_raw(1 << 24 | 4097)).unwrap_err();
        assert!(matches!(err, Error::CorruptBlock { position: 0, .. }));
    }

    #[test]
    fn test_read_past_end_reports_offset() {
        let store = store(vec![0u8; 32]);
        match store.data_block(16, BlockSize::from_raw(1 << 24 | 64)) {
            Err(Error::Io { offset, source }) => {
                assert_eq!(offset, 16);
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            },
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_base_offset() {
        let mut image = vec![0xEEu8; 1000];
        image.extend(raw_metadata_block(b"hello"));
        let store = BlockStore::new(image, 1000, 7, Compressor::Gzip, 4096, 8);
        let (data, disk_size) = store.metadata_block(0).unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(disk_size, 7);
    }
}
