use std::io::Read;

use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::error::{Error, Result};
use super::metadata::EntryReference;

pub const MAGIC: u32 = 0x73717368;

/// Size of the on-disk superblock in bytes
pub const SUPERBLOCK_SIZE: usize = 96;

const MIN_BLOCK_SIZE: u32 = 4096;
const MAX_BLOCK_SIZE: u32 = 1 << 20;

/// Marks an absent optional table (xattr, export, fragment)
pub const TABLE_ABSENT: u64 = u64::MAX;

/// The fixed header at the start of every SquashFS image
#[derive(Debug, Clone)]
pub struct Superblock {
    pub magic: u32,
    pub inode_count: u32,
    pub mod_time: u32,
    pub block_size: u32,
    pub frag_count: u32,
    pub compressor: Compressor,
    pub block_log: u16,
    pub flags: SuperblockFlags,
    pub id_count: u16,
    pub version_major: u16,
    pub version_minor: u16,
    pub root_inode: EntryReference,
    pub bytes_used: u64,
    pub id_table: u64,
    pub xattr_table: u64,
    pub inode_table: u64,
    pub dir_table: u64,
    pub frag_table: u64,
    pub export_table: u64,
}

bitflags! {
    pub struct SuperblockFlags: u16 {
        const INODES_UNCOMPRESSED = 0x0001;
        const DATABLOCKS_UNCOMPRESSED = 0x0002;
        const FRAGMENTS_UNCOMPRESSED = 0x0008;
        const FRAGMENTS_NOT_USED = 0x0010;
        const FRAGMENTS_ALWAYS_GENERATED = 0x0020;
        const DATA_DEDUPLICATED = 0x0040;
        const NFS_EXPORT_EXISTS = 0x0080;
        const XATTRS_UNCOMPRESSED = 0x0100;
        const NO_XATTRS = 0x0200;
        const COMPRESSOR_OPTIONS_PRESENT = 0x0400;
        const ID_TABLE_UNCOMPRESSED = 0x0800;
    }
}

/// Compression algorithm selector stored in the superblock
#[derive(Debug, IntoPrimitive, TryFromPrimitive, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compressor {
    Gzip = 1,
    Lzo = 2,
    Lzma = 3,
    Xz = 4,
    Lz4 = 5,
    Zstd = 6,
}

impl Superblock {
    /// Decode and validate a superblock. The reader must be positioned at the start of the image.
    pub fn read<R>(r: &mut R) -> Result<Superblock>
    where R: Read
    {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let inode_count = r.read_u32::<LittleEndian>()?;
        let mod_time = r.read_u32::<LittleEndian>()?;
        let block_size = r.read_u32::<LittleEndian>()?;
        let frag_count = r.read_u32::<LittleEndian>()?;
        let compressor_id = r.read_u16::<LittleEndian>()?;
        let compressor = Compressor::try_from(compressor_id).map_err(|_| {
            Error::InvalidSuperblock(format!("unknown compressor id {compressor_id}"))
        })?;
        let sb = Superblock {
            magic,
            inode_count,
            mod_time,
            block_size,
            frag_count,
            compressor,
            block_log: r.read_u16::<LittleEndian>()?,
            flags: SuperblockFlags::from_bits_truncate(r.read_u16::<LittleEndian>()?),
            id_count: r.read_u16::<LittleEndian>()?,
            version_major: r.read_u16::<LittleEndian>()?,
            version_minor: r.read_u16::<LittleEndian>()?,
            root_inode: EntryReference::read(r)?,
            bytes_used: r.read_u64::<LittleEndian>()?,
            id_table: r.read_u64::<LittleEndian>()?,
            xattr_table: r.read_u64::<LittleEndian>()?,
            inode_table: r.read_u64::<LittleEndian>()?,
            dir_table: r.read_u64::<LittleEndian>()?,
            frag_table: r.read_u64::<LittleEndian>()?,
            export_table: r.read_u64::<LittleEndian>()?,
        };
        sb.validate()?;
        Ok(sb)
    }

    pub fn from_bytes(b: &[u8]) -> Result<Superblock>
    {
        Superblock::read(&mut &b[..])
    }

    fn validate(&self) -> Result<()> {
        if (self.version_major, self.version_minor) != (4, 0) {
            return Err(Error::UnsupportedVersion {
                major: self.version_major,
                minor: self.version_minor,
            });
        }
        if !self.block_size.is_power_of_two()
            || !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size)
        {
            return Err(Error::InvalidSuperblock(format!("block size {}", self.block_size)));
        }
        if u32::from(self.block_log) != self.block_size.trailing_zeros() {
            return Err(Error::InvalidSuperblock(format!(
                "block log {} does not match block size {}", self.block_log, self.block_size
            )));
        }
        if self.inode_table >= self.bytes_used || self.dir_table >= self.bytes_used {
            return Err(Error::InvalidSuperblock("table offset beyond end of image".into()));
        }
        Ok(())
    }

    pub fn has_export_table(&self) -> bool {
        self.export_table != TABLE_ABSENT
    }

    pub fn has_xattr_table(&self) -> bool {
        self.xattr_table != TABLE_ABSENT
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    pub(crate) fn superblock_bytes(block_size: u32, compressor: u16) -> Vec<u8> {
        let mut b = Vec::with_capacity(SUPERBLOCK_SIZE);
        b.write_u32::<LittleEndian>(MAGIC).unwrap();
        b.write_u32::<LittleEndian>(3).unwrap(); // inode count
        b.write_u32::<LittleEndian>(1_700_000_000).unwrap();
        b.write_u32::<LittleEndian>(block_size).unwrap();
        b.write_u32::<LittleEndian>(0).unwrap(); // fragments
        b.write_u16::<LittleEndian>(compressor).unwrap();
        b.write_u16::<LittleEndian>(block_size.trailing_zeros() as u16).unwrap();
        b.write_u16::<LittleEndian>(0).unwrap();
        b.write_u16::<LittleEndian>(1).unwrap(); // ids
        b.write_u16::<LittleEndian>(4).unwrap();
        b.write_u16::<LittleEndian>(0).unwrap();
        b.write_u64::<LittleEndian>(0x20).unwrap(); // root inode
        b.write_u64::<LittleEndian>(4096).unwrap(); // bytes used
        for table in [512u64, TABLE_ABSENT, 128, 256, TABLE_ABSENT, TABLE_ABSENT] {
            b.write_u64::<LittleEndian>(table).unwrap();
        }
        b
    }

    #[test]
    fn test_read_superblock() {
        let sb = Superblock::from_bytes(&superblock_bytes(131072, 1)).unwrap();
        assert_eq!(sb.magic, MAGIC);
        assert_eq!(sb.block_size, 131072);
        assert_eq!(sb.block_log, 17);
        assert_eq!(sb.compressor, Compressor::Gzip);
        assert_eq!(sb.root_inode.offset(), 0x20);
        assert_eq!(sb.inode_table, 128);
        assert!(!sb.has_xattr_table());
        assert!(!sb.has_export_table());
    }

    #[test]
    fn test_bad_magic() {
        let mut b = superblock_bytes(131072, 1);
        b[0] = 0;
        assert!(matches!(Superblock::from_bytes(&b), Err(Error::BadMagic(_))));
    }

    #[test]
    fn test_bad_block_size() {
        let mut b = superblock_bytes(131072, 1);
        b[12..16].copy_from_slice(&100_000u32.to_le_bytes());
        assert!(matches!(Superblock::from_bytes(&b), Err(Error::InvalidSuperblock(_))));
    }

    #[test]
    fn test_unknown_compressor() {
        let b = superblock_bytes(131072, 42);
        assert!(matches!(Superblock::from_bytes(&b), Err(Error::InvalidSuperblock(_))));
    }

    #[test]
    fn test_truncated() {
        let b = superblock_bytes(131072, 1);
        assert!(matches!(Superblock::from_bytes(&b[..40]), Err(Error::Read(_))));
    }
}
