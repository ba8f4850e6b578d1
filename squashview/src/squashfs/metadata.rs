//! On-disk metadata structures: inode and directory table records and the lookup tables
//! (ids, fragments, exports) that are referenced from them.

use std::borrow::Cow;
use std::cmp::min;
use std::fmt::Debug;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::block::{BlockStore, METADATA_BLOCK_SIZE};
use super::error::{Error, Result};
use super::readermux::ReadAt;
use super::superblock::Superblock;

// Divide x by y, rounding up any fractional result
macro_rules! div_ceil {
    ($x:expr, $y:expr) => { ($x + $y - 1) / $y }
}

/// `frag_index` value of a file whose tail is stored as an ordinary block
pub const NO_FRAGMENT: u32 = u32::MAX;

/// `xattr_index` value of an inode without extended attributes
pub const NO_XATTR: u32 = u32::MAX;

// Longest name a directory entry or directory index may carry
const MAX_NAME_LEN: usize = 256;
// Longest symlink target accepted (PATH_MAX)
const MAX_SYMLINK_LEN: usize = 4096;
// Cap on up-front allocations driven by on-disk counts
const MAX_PREALLOC: usize = 4096;

/// An opaque reference value that can be used to retrieve a specific [`Inode`] using
/// [`inode_from_entryref`].
///
/// [`Inode`]: struct.Inode.html
/// [`inode_from_entryref`]: ../struct.SquashFS.html#method.inode_from_entryref
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryReference {
    val: u64
}

impl EntryReference {
    pub(crate) fn new(location: u64, offset: u16) -> Self {
        Self {
            val: (location << 16) | u64::from(offset),
        }
    }

    /// Position of the metadata block holding the entry, relative to the start of its table
    pub fn location(&self) -> u64 {
        self.val >> 16
    }

    /// Offset of the entry within the uncompressed metadata block
    pub fn offset(&self) -> u16 {
        (self.val & 0xFFFF) as u16
    }

    pub(crate) fn read<R>(r: &mut R) -> std::io::Result<Self>
    where R: Read
    {
        Ok(Self {
            val: r.read_u64::<LittleEndian>()?
        })
    }
}

impl std::fmt::Debug for EntryReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.location(), self.offset())
    }
}

/// Size descriptor of a data block, as stored in file inodes and the fragment table.
///
/// Bit 24 is set when the block is stored uncompressed; the low 24 bits give the number of bytes
/// the block occupies on disk. A size of zero marks a sparse block that reads as zeros.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BlockSize(u32);

impl BlockSize {
    const UNCOMPRESSED: u32 = 1 << 24;

    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn disk_size(&self) -> u32 {
        self.0 & (Self::UNCOMPRESSED - 1)
    }

    pub fn is_compressed(&self) -> bool {
        self.0 & Self::UNCOMPRESSED == 0
    }

    pub fn is_sparse(&self) -> bool {
        self.disk_size() == 0
    }
}

impl Debug for BlockSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = if self.is_compressed() { "" } else { " (uncompressed)" };
        write!(f, "{}{}", self.disk_size(), marker)
    }
}

pub(crate) trait FromBytes {
    const BYTE_SIZE: usize;
    fn from_bytes(buf: &[u8]) -> Self;
}

impl FromBytes for u32 {
    const BYTE_SIZE: usize = 4;
    fn from_bytes(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl FromBytes for EntryReference {
    const BYTE_SIZE: usize = 8;
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            val: LittleEndian::read_u64(buf),
        }
    }
}

/// A table of fixed-size records packed into metadata blocks, located through a list of `u64`
/// block positions stored uncompressed at `table_offset`
#[derive(Debug)]
pub(crate) struct LookupTable<I: FromBytes> {
    pub entries: Vec<I>,
}

impl<I: FromBytes> LookupTable<I> {
    pub fn read<R>(store: &BlockStore<R>, table_offset: u64, item_count: u32, what: &str) -> Result<Self>
    where R: ReadAt
    {
        let item_count = item_count as usize;
        let per_block = METADATA_BLOCK_SIZE / I::BYTE_SIZE;
        let block_count = div_ceil!(item_count, per_block);
        if block_count == 0 {
            return Ok(LookupTable { entries: Vec::new() });
        }
        let index_end = table_offset.checked_add(block_count as u64 * 8);
        if index_end.map_or(true, |end| end > store.bytes_used()) {
            return Err(Error::MalformedTable(format!(
                "{what} table of {item_count} entries at {table_offset} runs past end of image"
            )));
        }

        // Read the metadata block locations
        let mut index = vec![0u8; block_count * 8];
        store.read_raw(table_offset, &mut index)?;
        let block_offsets: Vec<u64> = index.chunks_exact(8).map(LittleEndian::read_u64).collect();

        // Parse the metadata blocks into entries
        let mut entries = Vec::with_capacity(min(item_count, MAX_PREALLOC));
        for &offset in &block_offsets {
            let (data, _) = store.metadata_block(offset)?;
            let wanted = min(per_block, item_count - entries.len());
            if data.len() < wanted * I::BYTE_SIZE {
                return Err(Error::MalformedTable(format!(
                    "{what} block at {offset} holds {} bytes, expected {}", data.len(), wanted * I::BYTE_SIZE
                )));
            }
            entries.extend(data.chunks_exact(I::BYTE_SIZE).take(wanted).map(I::from_bytes));
        }
        debug!("loaded {what} table: {} entries in {} blocks", entries.len(), block_offsets.len());
        Ok(LookupTable { entries })
    }
}

/// Location and size of one fragment block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentEntry {
    pub start: u64,
    pub size: BlockSize,
}

impl FromBytes for FragmentEntry {
    const BYTE_SIZE: usize = 16;
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            start: LittleEndian::read_u64(&buf[0..8]),
            size: BlockSize(LittleEndian::read_u32(&buf[8..12])),
        }
    }
}

#[derive(Debug)]
pub(crate) struct FragmentLookupTable {
    pub lu_table: LookupTable<FragmentEntry>,
}

impl FragmentLookupTable {
    pub fn read<R>(store: &BlockStore<R>, sb: &Superblock) -> Result<Self>
    where R: ReadAt
    {
        let count = if sb.frag_table == super::superblock::TABLE_ABSENT { 0 } else { sb.frag_count };
        Ok(Self {
            lu_table: LookupTable::read(store, sb.frag_table, count, "fragment")?,
        })
    }

    pub fn get(&self, index: u32) -> Result<FragmentEntry> {
        self.lu_table.entries.get(index as usize).copied().ok_or_else(|| {
            Error::MalformedInode(format!(
                "fragment index {index} out of range ({} fragments)", self.lu_table.entries.len()
            ))
        })
    }
}

#[derive(Debug)]
pub(crate) struct IdLookupTable {
    pub lu_table: LookupTable<u32>,
}

impl IdLookupTable {
    pub fn read<R>(store: &BlockStore<R>, sb: &Superblock) -> Result<Self>
    where R: ReadAt
    {
        Ok(Self {
            lu_table: LookupTable::read(store, sb.id_table, sb.id_count.into(), "id")?,
        })
    }

    pub fn get(&self, index: u16) -> Result<u32> {
        self.lu_table.entries.get(usize::from(index)).copied().ok_or_else(|| {
            Error::MalformedTable(format!(
                "id index {index} out of range ({} ids)", self.lu_table.entries.len()
            ))
        })
    }
}

/// Maps inode numbers to inode references; only present in images built for NFS export
#[derive(Debug)]
pub(crate) struct ExportLookupTable {
    pub lu_table: LookupTable<EntryReference>,
}

impl ExportLookupTable {
    pub fn read<R>(store: &BlockStore<R>, sb: &Superblock) -> Result<Option<Self>>
    where R: ReadAt
    {
        if !sb.has_export_table() {
            return Ok(None)
        }
        Ok(Some(Self {
            lu_table: LookupTable::read(store, sb.export_table, sb.inode_count, "export")?,
        }))
    }

    pub fn get(&self, inode_number: u32) -> Option<EntryReference> {
        let index = inode_number.checked_sub(1)?;
        self.lu_table.entries.get(index as usize).copied()
    }
}

/// Type tags of inodes and directory entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum InodeType {
    BasicDir = 1,
    BasicFile = 2,
    BasicSymlink = 3,
    BasicBlockDev = 4,
    BasicCharDev = 5,
    BasicFifo = 6,
    BasicSocket = 7,
    ExtDir = 8,
    ExtFile = 9,
    ExtSymlink = 10,
    ExtBlockDev = 11,
    ExtCharDev = 12,
    ExtFifo = 13,
    ExtSocket = 14,
    #[num_enum(default)]
    Unknown = 0xFFFF,
}

impl InodeType {
    pub fn file_type(self) -> FileType {
        match self {
            InodeType::BasicDir | InodeType::ExtDir => FileType::Directory,
            InodeType::BasicFile | InodeType::ExtFile => FileType::Regular,
            InodeType::BasicSymlink | InodeType::ExtSymlink => FileType::Symlink,
            InodeType::BasicBlockDev | InodeType::ExtBlockDev => FileType::BlockDevice,
            InodeType::BasicCharDev | InodeType::ExtCharDev => FileType::CharDevice,
            InodeType::BasicFifo | InodeType::ExtFifo => FileType::Fifo,
            InodeType::BasicSocket | InodeType::ExtSocket => FileType::Socket,
            InodeType::Unknown => FileType::Irregular,
        }
    }
}

pub const S_IFMT: u32 = 0o170000;
pub const S_IFSOCK: u32 = 0o140000;
pub const S_IFLNK: u32 = 0o120000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFBLK: u32 = 0o060000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFCHR: u32 = 0o020000;
pub const S_IFIFO: u32 = 0o010000;

/// Structural type of a filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Directory,
    Regular,
    Symlink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    /// A type tag this decoder does not know. Carries no mode type bits.
    Irregular,
}

impl FileType {
    /// The `S_IF*` bits of this type
    pub fn mode_bits(self) -> u32 {
        match self {
            FileType::Directory => S_IFDIR,
            FileType::Regular => S_IFREG,
            FileType::Symlink => S_IFLNK,
            FileType::BlockDevice => S_IFBLK,
            FileType::CharDevice => S_IFCHR,
            FileType::Fifo => S_IFIFO,
            FileType::Socket => S_IFSOCK,
            FileType::Irregular => 0,
        }
    }
}

/// Information about an object in the filesystem (ex. file, directory, device node)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    permissions: u16,
    uid_index: u16,
    gid_index: u16,
    mtime: u32,
    inode_number: u32,
    pub extended_info: InodeExtendedInfo,
}

/// Type-specific information about a filesystem object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodeExtendedInfo {
    BasicDir(BasicDirInfo),
    ExtDir(ExtDirInfo),
    BasicFile(BasicFileInfo),
    ExtFile(ExtFileInfo),
    BasicSymlink(BasicSymlinkInfo),
    ExtSymlink(ExtSymlinkInfo),
    BasicBlockDev(BasicDevInfo),
    ExtBlockDev(ExtDevInfo),
    BasicCharDev(BasicDevInfo),
    ExtCharDev(ExtDevInfo),
    BasicFifo(BasicIpcInfo),
    ExtFifo(ExtIpcInfo),
    BasicSocket(BasicIpcInfo),
    ExtSocket(ExtIpcInfo),
}

/// Information about a directory object in the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDirInfo {
    pub block_index: u32,
    pub link_count: u32,
    pub file_size: u16,
    pub block_offset: u16,
    pub parent_inode: u32,
}

/// Information about a directory object with extended attributes or a directory index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtDirInfo {
    pub link_count: u32,
    pub file_size: u32,
    pub block_index: u32,
    pub parent_inode: u32,
    pub block_offset: u16,
    pub xattr_index: u32,
    pub index: Vec<DirIndex>,
}

/// Shortcut into a large directory listing: the first name of a directory header and where that
/// header lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirIndex {
    /// Byte offset of the header within the listing
    pub index: u32,
    /// Directory table block holding the header
    pub start: u32,
    pub name: Vec<u8>,
}

impl From<BasicDirInfo> for ExtDirInfo {
    fn from(d: BasicDirInfo) -> Self {
        ExtDirInfo {
            link_count: d.link_count,
            file_size: d.file_size.into(),
            block_index: d.block_index,
            parent_inode: d.parent_inode,
            block_offset: d.block_offset,
            xattr_index: NO_XATTR,
            index: Vec::new(),
        }
    }
}

/// Fragment-resident tail of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentRef {
    /// Index into the fragment table
    pub index: u32,
    /// Offset of the tail within the uncompressed fragment block
    pub offset: u32,
}

/// Information about a file object in the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFileInfo {
    pub blocks_start: u32,
    pub fragment: Option<FragmentRef>,
    pub file_size: u32,
    pub block_sizes: Vec<BlockSize>,
}

/// Information about a file object with 64-bit sizes, hard links, sparse data or xattrs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtFileInfo {
    pub blocks_start: u64,
    pub file_size: u64,
    pub sparse: u64,
    pub link_count: u32,
    pub fragment: Option<FragmentRef>,
    pub xattr_index: u32,
    pub block_sizes: Vec<BlockSize>,
}

impl From<BasicFileInfo> for ExtFileInfo {
    fn from(f: BasicFileInfo) -> Self {
        ExtFileInfo {
            blocks_start: f.blocks_start.into(),
            file_size: f.file_size.into(),
            sparse: 0,
            link_count: 1,
            fragment: f.fragment,
            xattr_index: NO_XATTR,
            block_sizes: f.block_sizes,
        }
    }
}

/// Information about a symbolic link object in the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicSymlinkInfo {
    pub link_count: u32,
    pub target_path: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtSymlinkInfo {
    pub link_count: u32,
    pub target_path: Vec<u8>,
    pub xattr_index: u32,
}

impl From<BasicSymlinkInfo> for ExtSymlinkInfo {
    fn from(s: BasicSymlinkInfo) -> Self {
        ExtSymlinkInfo { link_count: s.link_count, target_path: s.target_path, xattr_index: NO_XATTR }
    }
}

/// Information about a device object in the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicDevInfo {
    pub link_count: u32,
    pub dev_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtDevInfo {
    pub link_count: u32,
    pub dev_number: u32,
    pub xattr_index: u32,
}

/// Information about an IPC object (fifo or socket) in the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicIpcInfo {
    pub link_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtIpcInfo {
    pub link_count: u32,
    pub xattr_index: u32,
}

fn read_name<R: Read>(r: &mut R, size: usize, what: &str) -> Result<Vec<u8>> {
    if size > MAX_NAME_LEN {
        return Err(Error::MalformedDirectory(format!("{what} name of {size} bytes")));
    }
    let mut name = vec![0u8; size];
    r.read_exact(&mut name)?;
    Ok(name)
}

fn read_block_list<R: Read>(r: &mut R, file_size: u64, frag_index: u32, block_offset: u32, block_size: u32)
    -> Result<(Option<FragmentRef>, Vec<BlockSize>)>
{
    let bs = u64::from(block_size);
    let tail = file_size % bs;
    let fragment = (frag_index != NO_FRAGMENT).then_some(FragmentRef { index: frag_index, offset: block_offset });
    let num_blocks = match fragment {
        None => file_size / bs + u64::from(tail != 0),
        Some(f) => {
            if tail == 0 {
                return Err(Error::MalformedInode(format!(
                    "fragment {} referenced by a file of {file_size} bytes with no tail", f.index
                )));
            }
            if u64::from(f.offset) + tail > bs {
                return Err(Error::MalformedInode(format!(
                    "fragment offset {} plus tail {tail} exceeds block size {bs}", f.offset
                )));
            }
            file_size / bs
        },
    };
    let num_blocks = usize::try_from(num_blocks)
        .map_err(|_| Error::MalformedInode(format!("file size {file_size} too large")))?;

    let mut block_sizes = Vec::with_capacity(min(num_blocks, MAX_PREALLOC));
    for _ in 0..num_blocks {
        block_sizes.push(BlockSize(r.read_u32::<LittleEndian>()?));
    }
    Ok((fragment, block_sizes))
}

fn read_symlink_target<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let target_size = r.read_u32::<LittleEndian>()? as usize;
    if target_size > MAX_SYMLINK_LEN {
        return Err(Error::MalformedInode(format!("symlink target of {target_size} bytes")));
    }
    let mut target_path = vec![0u8; target_size];
    r.read_exact(&mut target_path)?;
    Ok(target_path)
}

impl Inode {
    /// Decode one inode from the inode table. The type tag at the start of the record selects
    /// the layout of the rest. A record that ends early is a malformed inode.
    pub(crate) fn read<R>(r: &mut R, block_size: u32) -> Result<Self>
    where R: Read
    {
        Self::decode(r, block_size).map_err(|e| match e {
            Error::Read(source) => Error::MalformedInode(format!("truncated record: {source}")),
            e => e,
        })
    }

    fn decode<R>(r: &mut R, block_size: u32) -> Result<Self>
    where R: Read
    {
        let raw_type = r.read_u16::<LittleEndian>()?;
        let inode_type = InodeType::try_from(raw_type).unwrap_or(InodeType::Unknown);
        let permissions = r.read_u16::<LittleEndian>()?;
        let uid_index = r.read_u16::<LittleEndian>()?;
        let gid_index = r.read_u16::<LittleEndian>()?;
        let mtime = r.read_u32::<LittleEndian>()?;
        let inode_number = r.read_u32::<LittleEndian>()?;
        let extended_info = match inode_type {
            InodeType::BasicDir => InodeExtendedInfo::BasicDir(BasicDirInfo {
                block_index: r.read_u32::<LittleEndian>()?,
                link_count: r.read_u32::<LittleEndian>()?,
                file_size: r.read_u16::<LittleEndian>()?,
                block_offset: r.read_u16::<LittleEndian>()?,
                parent_inode: r.read_u32::<LittleEndian>()?,
            }),
            InodeType::ExtDir => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?;
                let block_index = r.read_u32::<LittleEndian>()?;
                let parent_inode = r.read_u32::<LittleEndian>()?;
                let index_count = r.read_u16::<LittleEndian>()?;
                let block_offset = r.read_u16::<LittleEndian>()?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                let mut index = Vec::with_capacity(index_count.into());
                for _ in 0..index_count {
                    let offset = r.read_u32::<LittleEndian>()?;
                    let start = r.read_u32::<LittleEndian>()?;
                    let name_size = r.read_u32::<LittleEndian>()? as usize + 1;
                    let name = read_name(r, name_size, "directory index")
                        .map_err(|e| Error::MalformedInode(e.to_string()))?;
                    index.push(DirIndex { index: offset, start, name });
                }
                InodeExtendedInfo::ExtDir(ExtDirInfo {
                    link_count, file_size, block_index, parent_inode, block_offset, xattr_index, index,
                })
            },
            InodeType::BasicFile => {
                let blocks_start = r.read_u32::<LittleEndian>()?;
                let frag_index = r.read_u32::<LittleEndian>()?;
                let block_offset = r.read_u32::<LittleEndian>()?;
                let file_size = r.read_u32::<LittleEndian>()?;
                let (fragment, block_sizes) = read_block_list(r, file_size.into(), frag_index, block_offset, block_size)?;
                InodeExtendedInfo::BasicFile(BasicFileInfo {
                    blocks_start, fragment, file_size, block_sizes,
                })
            },
            InodeType::ExtFile => {
                let blocks_start = r.read_u64::<LittleEndian>()?;
                let file_size = r.read_u64::<LittleEndian>()?;
                let sparse = r.read_u64::<LittleEndian>()?;
                let link_count = r.read_u32::<LittleEndian>()?;
                let frag_index = r.read_u32::<LittleEndian>()?;
                let block_offset = r.read_u32::<LittleEndian>()?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                let (fragment, block_sizes) = read_block_list(r, file_size, frag_index, block_offset, block_size)?;
                InodeExtendedInfo::ExtFile(ExtFileInfo {
                    blocks_start, file_size, sparse, link_count, fragment, xattr_index, block_sizes,
                })
            },
            InodeType::BasicSymlink => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let target_path = read_symlink_target(r)?;
                InodeExtendedInfo::BasicSymlink(BasicSymlinkInfo { link_count, target_path })
            },
            InodeType::ExtSymlink => {
                let link_count = r.read_u32::<LittleEndian>()?;
                let target_path = read_symlink_target(r)?;
                let xattr_index = r.read_u32::<LittleEndian>()?;
                InodeExtendedInfo::ExtSymlink(ExtSymlinkInfo { link_count, target_path, xattr_index })
            },
            InodeType::BasicBlockDev | InodeType::BasicCharDev => {
                let dev = BasicDevInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    dev_number: r.read_u32::<LittleEndian>()?,
                };
                if inode_type == InodeType::BasicBlockDev {
                    InodeExtendedInfo::BasicBlockDev(dev)
                } else {
                    InodeExtendedInfo::BasicCharDev(dev)
                }
            },
            InodeType::ExtBlockDev | InodeType::ExtCharDev => {
                let dev = ExtDevInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    dev_number: r.read_u32::<LittleEndian>()?,
                    xattr_index: r.read_u32::<LittleEndian>()?,
                };
                if inode_type == InodeType::ExtBlockDev {
                    InodeExtendedInfo::ExtBlockDev(dev)
                } else {
                    InodeExtendedInfo::ExtCharDev(dev)
                }
            },
            InodeType::BasicFifo | InodeType::BasicSocket => {
                let ipc = BasicIpcInfo { link_count: r.read_u32::<LittleEndian>()? };
                if inode_type == InodeType::BasicFifo {
                    InodeExtendedInfo::BasicFifo(ipc)
                } else {
                    InodeExtendedInfo::BasicSocket(ipc)
                }
            },
            InodeType::ExtFifo | InodeType::ExtSocket => {
                let ipc = ExtIpcInfo {
                    link_count: r.read_u32::<LittleEndian>()?,
                    xattr_index: r.read_u32::<LittleEndian>()?,
                };
                if inode_type == InodeType::ExtFifo {
                    InodeExtendedInfo::ExtFifo(ipc)
                } else {
                    InodeExtendedInfo::ExtSocket(ipc)
                }
            },
            InodeType::Unknown => {
                return Err(Error::MalformedInode(format!("unknown inode type {raw_type}")));
            },
        };

        Ok(Self {
            permissions, uid_index, gid_index, mtime, inode_number, extended_info
        })
    }

    pub fn inode_type(&self) -> InodeType {
        match &self.extended_info {
            InodeExtendedInfo::BasicDir(_) => InodeType::BasicDir,
            InodeExtendedInfo::ExtDir(_) => InodeType::ExtDir,
            InodeExtendedInfo::BasicFile(_) => InodeType::BasicFile,
            InodeExtendedInfo::ExtFile(_) => InodeType::ExtFile,
            InodeExtendedInfo::BasicSymlink(_) => InodeType::BasicSymlink,
            InodeExtendedInfo::ExtSymlink(_) => InodeType::ExtSymlink,
            InodeExtendedInfo::BasicBlockDev(_) => InodeType::BasicBlockDev,
            InodeExtendedInfo::ExtBlockDev(_) => InodeType::ExtBlockDev,
            InodeExtendedInfo::BasicCharDev(_) => InodeType::BasicCharDev,
            InodeExtendedInfo::ExtCharDev(_) => InodeType::ExtCharDev,
            InodeExtendedInfo::BasicFifo(_) => InodeType::BasicFifo,
            InodeExtendedInfo::ExtFifo(_) => InodeType::ExtFifo,
            InodeExtendedInfo::BasicSocket(_) => InodeType::BasicSocket,
            InodeExtendedInfo::ExtSocket(_) => InodeType::ExtSocket,
        }
    }

    pub fn file_type(&self) -> FileType {
        self.inode_type().file_type()
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == FileType::Regular
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == FileType::Symlink
    }

    pub fn inode_number(&self) -> u32 {
        self.inode_number
    }

    pub fn permissions(&self) -> u16 {
        self.permissions
    }

    /// Permission bits combined with the `S_IF*` bits of the inode's type
    pub fn mode(&self) -> u32 {
        (u32::from(self.permissions) & 0o7777) | self.file_type().mode_bits()
    }

    pub fn uid_index(&self) -> u16 {
        self.uid_index
    }

    pub fn gid_index(&self) -> u16 {
        self.gid_index
    }

    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    /// Size in bytes: content length for files, listing size for directories, target length
    /// for symlinks and zero for everything else
    pub fn file_size(&self) -> u64 {
        match &self.extended_info {
            InodeExtendedInfo::BasicFile(i) => i.file_size.into(),
            InodeExtendedInfo::ExtFile(i) => i.file_size,
            InodeExtendedInfo::BasicDir(i) => i.file_size.into(),
            InodeExtendedInfo::ExtDir(i) => i.file_size.into(),
            InodeExtendedInfo::BasicSymlink(i) => i.target_path.len() as u64,
            InodeExtendedInfo::ExtSymlink(i) => i.target_path.len() as u64,
            _ => 0,
        }
    }

    pub fn link_count(&self) -> u32 {
        match &self.extended_info {
            InodeExtendedInfo::BasicDir(i) => i.link_count,
            InodeExtendedInfo::ExtDir(i) => i.link_count,
            InodeExtendedInfo::BasicFile(_) => 1,
            InodeExtendedInfo::ExtFile(i) => i.link_count,
            InodeExtendedInfo::BasicSymlink(i) => i.link_count,
            InodeExtendedInfo::ExtSymlink(i) => i.link_count,
            InodeExtendedInfo::BasicBlockDev(i) | InodeExtendedInfo::BasicCharDev(i) => i.link_count,
            InodeExtendedInfo::ExtBlockDev(i) | InodeExtendedInfo::ExtCharDev(i) => i.link_count,
            InodeExtendedInfo::BasicFifo(i) | InodeExtendedInfo::BasicSocket(i) => i.link_count,
            InodeExtendedInfo::ExtFifo(i) | InodeExtendedInfo::ExtSocket(i) => i.link_count,
        }
    }

    /// Index into the xattr lookup table, if the inode has extended attributes
    pub fn xattr_index(&self) -> Option<u32> {
        let index = match &self.extended_info {
            InodeExtendedInfo::ExtDir(i) => i.xattr_index,
            InodeExtendedInfo::ExtFile(i) => i.xattr_index,
            InodeExtendedInfo::ExtSymlink(i) => i.xattr_index,
            InodeExtendedInfo::ExtBlockDev(i) | InodeExtendedInfo::ExtCharDev(i) => i.xattr_index,
            InodeExtendedInfo::ExtFifo(i) | InodeExtendedInfo::ExtSocket(i) => i.xattr_index,
            _ => NO_XATTR,
        };
        (index != NO_XATTR).then_some(index)
    }

    pub fn symlink_target(&self) -> Option<&[u8]> {
        match &self.extended_info {
            InodeExtendedInfo::BasicSymlink(i) => Some(&i.target_path),
            InodeExtendedInfo::ExtSymlink(i) => Some(&i.target_path),
            _ => None,
        }
    }

    /// Packed device number of a block or character device
    pub fn device_number(&self) -> Option<u32> {
        match &self.extended_info {
            InodeExtendedInfo::BasicBlockDev(i) | InodeExtendedInfo::BasicCharDev(i) => Some(i.dev_number),
            InodeExtendedInfo::ExtBlockDev(i) | InodeExtendedInfo::ExtCharDev(i) => Some(i.dev_number),
            _ => None,
        }
    }

    /// File layout with basic inodes widened to the extended form
    pub fn file_info(&self) -> Option<ExtFileInfo> {
        self.file_layout().map(Cow::into_owned)
    }

    /// Like [`file_info`](Self::file_info), borrowing extended inodes instead of copying them
    pub fn file_layout(&self) -> Option<Cow<'_, ExtFileInfo>> {
        match &self.extended_info {
            InodeExtendedInfo::BasicFile(i) => Some(Cow::Owned(i.clone().into())),
            InodeExtendedInfo::ExtFile(i) => Some(Cow::Borrowed(i)),
            _ => None,
        }
    }

    /// Block size descriptors of a regular file, empty for any other type
    pub fn block_sizes(&self) -> &[BlockSize] {
        match &self.extended_info {
            InodeExtendedInfo::BasicFile(i) => &i.block_sizes,
            InodeExtendedInfo::ExtFile(i) => &i.block_sizes,
            _ => &[],
        }
    }

    /// Directory layout with basic inodes widened to the extended form
    pub fn dir_info(&self) -> Option<ExtDirInfo> {
        self.dir_layout().map(Cow::into_owned)
    }

    pub fn dir_layout(&self) -> Option<Cow<'_, ExtDirInfo>> {
        match &self.extended_info {
            InodeExtendedInfo::BasicDir(i) => Some(Cow::Owned(i.clone().into())),
            InodeExtendedInfo::ExtDir(i) => Some(Cow::Borrowed(i)),
            _ => None,
        }
    }
}

/// One run of directory entries sharing an inode table block
#[doc(hidden)]
#[derive(Debug)]
pub struct DirTable {
    pub start: u32,
    pub inode_number: u32,
    pub entries: Vec<DirTableEntry>,
}

#[doc(hidden)]
#[derive(Debug)]
pub struct DirTableEntry {
    pub(crate) offset: u16,
    pub(crate) inode_offset: i16,
    pub(crate) inode_type: InodeType,
    pub(crate) name: Vec<u8>,
}

impl DirTableEntry {
    /// Reference to the entry's inode; `start` comes from the enclosing header
    pub(crate) fn inode_ref(&self, start: u32) -> EntryReference {
        EntryReference::new(start.into(), self.offset)
    }

    pub(crate) fn inode_number(&self, base: u32) -> u32 {
        base.wrapping_add_signed(self.inode_offset.into())
    }
}

impl DirTable {
    // Entries per header are capped by mksquashfs and the kernel
    const MAX_ENTRIES: u32 = 256;

    pub(crate) fn load<R>(r: &mut R) -> Result<Self>
    where R: Read
    {
        // Stored as one less than the entry count
        let stored = r.read_u32::<LittleEndian>()?;
        if stored >= Self::MAX_ENTRIES {
            return Err(Error::MalformedDirectory(format!("header claims {stored} + 1 entries")));
        }
        let count = stored + 1;
        let start = r.read_u32::<LittleEndian>()?;
        let inode_number = r.read_u32::<LittleEndian>()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let offset = r.read_u16::<LittleEndian>()?;
            let inode_offset = r.read_i16::<LittleEndian>()?;
            let inode_type = InodeType::try_from(r.read_u16::<LittleEndian>()?).unwrap_or(InodeType::Unknown);
            let name_size = usize::from(r.read_u16::<LittleEndian>()?) + 1;
            let name = read_name(r, name_size, "entry")?;
            entries.push(DirTableEntry { offset, inode_offset, inode_type, name });
        }
        Ok(DirTable { start, inode_number, entries })
    }

    /// Read every header of a directory listing. The reader must be positioned at the start
    /// of the listing, which is `file_size - 3` bytes long.
    pub(crate) fn read_for_dir<R>(r: &mut R, dir: &ExtDirInfo) -> Result<Vec<Self>>
    where R: Read
    {
        let mut reader = r.take(u64::from(dir.file_size.saturating_sub(3)));
        let mut tables = Vec::new();
        while reader.limit() > 0 {
            tables.push(Self::load(&mut reader)?);
        }
        Ok(tables)
    }
}
