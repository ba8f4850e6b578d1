//! See https://dr-emann.github.io/squashfs/squashfs.html
//! for details on the SquashFS binary format

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Component, Path};
use std::sync::{Arc, Weak};

use log::{debug, trace, warn};
use parking_lot::Mutex;

use super::block::BlockStore;
use super::cache::BlockCache;
use super::direntry::{DirEntry, ReadDir};
use super::error::{Error, Result};
use super::filedata::File;
use super::metadata::{self, DirTable, EntryReference, FragmentEntry, Inode};
use super::readermux::{self, FileSource, ReadAt};
use super::superblock::{Compressor, Superblock, SUPERBLOCK_SIZE};
use super::xattr::XattrTable;

/// Default number of decompressed blocks kept by the block cache
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Settings applied when a SquashFS is mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    cache_capacity: usize,
    offset: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            offset: 0,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of decompressed blocks (data, fragment and metadata) kept in memory
    pub fn cache_capacity(mut self, blocks: usize) -> Self {
        self.cache_capacity = blocks;
        self
    }

    /// Byte offset of the image within the underlying reader, for images embedded in a larger
    /// container
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }
}

/// The top-level interface to a SquashFS filesystem. This struct can be used to look up Inodes,
/// list directory contents, and open file data readers.
///
/// All methods take `&self`; entries and file handles borrow the filesystem, so any number of
/// them can be used at once, from several threads if `R` is `Sync`.
#[derive(Debug)]
pub struct SquashFS<R> {
    store: BlockStore<R>,
    sb: Superblock,
    id_table: metadata::IdLookupTable,
    frag_table: metadata::FragmentLookupTable,
    export_table: Option<metadata::ExportLookupTable>,
    xattr_table: Option<XattrTable>,
    root: Arc<Inode>,
    inodes: Mutex<LiveInodes>,
}

// Inodes that some entry or handle still holds, so hard links and repeated lookups share one
#[derive(Debug, Default)]
struct LiveInodes {
    by_ref: HashMap<EntryReference, Weak<Inode>>,
    prune_at: usize,
}

impl LiveInodes {
    const MIN_PRUNE: usize = 256;

    fn get(&self, inode_ref: EntryReference) -> Option<Arc<Inode>> {
        self.by_ref.get(&inode_ref).and_then(Weak::upgrade)
    }

    fn insert(&mut self, inode_ref: EntryReference, inode: &Arc<Inode>) {
        if self.by_ref.len() >= self.prune_at {
            self.by_ref.retain(|_, w| w.strong_count() > 0);
            self.prune_at = (self.by_ref.len() * 2).max(Self::MIN_PRUNE);
        }
        self.by_ref.insert(inode_ref, Arc::downgrade(inode));
    }
}

impl SquashFS<FileSource> {
    /// Open the contents of a filepath as a SquashFS
    pub fn open<P>(path: P) -> Result<Self>
    where P: AsRef<Path>
    {
        Self::open_with(path, Options::default())
    }

    pub fn open_with<P>(path: P, options: Options) -> Result<Self>
    where P: AsRef<Path>
    {
        Self::with_options(readermux::file_source(fs::File::open(path)?), options)
    }
}

impl<R: ReadAt> SquashFS<R> {
    /// Create a new SquashFS instance from the provided reader
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, Options::default())
    }

    pub fn with_options(reader: R, options: Options) -> Result<Self> {
        let mut raw = [0u8; SUPERBLOCK_SIZE];
        reader.read_exact_at(&mut raw, options.offset)
            .map_err(|source| Error::Io { offset: 0, source })?;
        let sb = Superblock::from_bytes(&raw)?;
        if !sb.compressor.is_supported() {
            warn!("image uses {:?} compression, which this build cannot decompress", sb.compressor);
        }

        let store = BlockStore::new(reader, options.offset, sb.bytes_used, sb.compressor, sb.block_size, options.cache_capacity);
        let id_table = metadata::IdLookupTable::read(&store, &sb)?;
        let frag_table = metadata::FragmentLookupTable::read(&store, &sb)?;
        let export_table = metadata::ExportLookupTable::read(&store, &sb)?;
        let xattr_table = XattrTable::read(&store, &sb)?;

        let root = Self::read_inode(&store, &sb, sb.root_inode)?;
        if !root.is_dir() {
            return Err(Error::MalformedInode(format!("root inode {:?} is not a directory", sb.root_inode)));
        }
        debug!(
            "mounted squashfs: {} inodes, {} byte blocks, {:?}, {} fragments, {} ids, export table: {}, xattrs: {}",
            sb.inode_count, sb.block_size, sb.compressor, sb.frag_count, sb.id_count,
            export_table.is_some(), xattr_table.is_some(),
        );

        let root = Arc::new(root);
        let mut inodes = LiveInodes::default();
        inodes.insert(sb.root_inode, &root);

        Ok(SquashFS {
            store,
            sb,
            id_table,
            frag_table,
            export_table,
            xattr_table,
            inodes: Mutex::new(inodes),
            root,
        })
    }

    fn read_inode(store: &BlockStore<R>, sb: &Superblock, inode_ref: EntryReference) -> Result<Inode> {
        let mut reader = store.metadata_reader(sb.inode_table, inode_ref)?;
        Inode::read(&mut reader, sb.block_size).map_err(|e| match e {
            Error::MalformedInode(msg) => Error::MalformedInode(format!("{msg} at inode {inode_ref:?}")),
            e => e,
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    /// Size of a full uncompressed data block
    pub fn block_size(&self) -> u32 {
        self.sb.block_size
    }

    pub fn compressor(&self) -> Compressor {
        self.sb.compressor
    }

    /// The cache shared by every reader of this filesystem
    pub fn cache(&self) -> &BlockCache {
        self.store.cache()
    }

    pub fn set_cache_capacity(&self, blocks: usize) {
        self.store.cache().resize(blocks)
    }

    /// Retrieve the root Inode of the SquashFS. This corresponds to the '/' directory
    pub fn root_inode(&self) -> &Arc<Inode> {
        &self.root
    }

    /// The root directory as an entry named "/"
    pub fn root(&self) -> Result<DirEntry<'_, R>> {
        DirEntry::new(self, b"/".to_vec(), self.sb.root_inode, Arc::clone(&self.root))
    }

    /// Retrieve the Inode specified by SquashFS metadata Entry Reference
    pub fn inode_from_entryref(&self, inode_ref: EntryReference) -> Result<Inode> {
        Self::read_inode(&self.store, &self.sb, inode_ref)
    }

    /// The inode at `inode_ref`, shared with every entry and handle that still holds it.
    /// Decoded afresh only when nothing does.
    pub fn shared_inode(&self, inode_ref: EntryReference) -> Result<Arc<Inode>> {
        if let Some(inode) = self.inodes.lock().get(inode_ref) {
            return Ok(inode);
        }
        let decoded = Arc::new(self.inode_from_entryref(inode_ref)?);
        let mut inodes = self.inodes.lock();
        // Another thread may have decoded it in the meantime
        if let Some(inode) = inodes.get(inode_ref) {
            return Ok(inode);
        }
        trace!("decoded inode {} at {inode_ref:?}", decoded.inode_number());
        inodes.insert(inode_ref, &decoded);
        Ok(decoded)
    }

    /// Retrieve an Inode by number. Only images built with an export table support this.
    pub fn inode_by_number(&self, inode_number: u32) -> Result<Inode> {
        let table = self.export_table.as_ref()
            .ok_or(Error::NotImplemented("inode lookup by number without an export table"))?;
        let inode_ref = table.get(inode_number)
            .ok_or_else(|| Error::NotFound(format!("inode {inode_number}")))?;
        self.inode_from_entryref(inode_ref)
    }

    /// Retrieve the entry at the given path. Symbolic links are not followed; see
    /// [`path::canonicalize`](super::path::canonicalize) for that.
    pub fn lookup<P>(&self, path: P) -> Result<DirEntry<'_, R>>
    where P: AsRef<Path>
    {
        let path = path.as_ref();
        let mut resolved: Vec<DirEntry<'_, R>> = Vec::new();
        for comp in path.components() {
            match comp {
                Component::RootDir => resolved.clear(),
                Component::CurDir => {},
                Component::ParentDir => {
                    resolved.pop();
                },
                Component::Normal(name) => {
                    let dir = resolved.last().map_or(&*self.root, |e| e.inode());
                    let entry = self.lookup_child(dir, name.as_encoded_bytes())?;
                    resolved.push(entry);
                },
                Component::Prefix(_) => return Err(Error::NotFound(path.display().to_string())),
            }
        }
        match resolved.pop() {
            Some(entry) => Ok(entry),
            None => self.root(),
        }
    }

    /// Find the entry called `name` in the directory `dir`
    pub fn lookup_child(&self, dir: &Inode, name: &[u8]) -> Result<DirEntry<'_, R>> {
        for table in self.dir_tables(dir)? {
            if let Some(e) = table.entries.iter().find(|e| e.name == name) {
                return DirEntry::from_table(self, table.start, table.inode_number, e);
            }
        }
        Err(Error::NotFound(String::from_utf8_lossy(name).into_owned()))
    }

    /// Retrieve an iterator that walks the dirents within a directory specified by the given
    /// path. path must refer to an existing directory or this function returns an error.
    pub fn read_dir<P>(&self, path: P) -> Result<ReadDir<'_, R>>
    where P: AsRef<Path>
    {
        let entry = self.lookup(path)?;
        self.read_dir_inode(entry.inode())
    }

    /// Retrieve an iterator that walks the dirents within a directory specified by the given
    /// DirEntry.
    pub fn read_dir_entry(&self, entry: &DirEntry<'_, R>) -> Result<ReadDir<'_, R>> {
        self.read_dir_inode(entry.inode())
    }

    /// Retrieve an iterator that walks the dirents within a directory specified by the given
    /// Inode.
    pub fn read_dir_inode(&self, inode: &Inode) -> Result<ReadDir<'_, R>> {
        Ok(ReadDir::new(self, self.dir_tables(inode)?))
    }

    /// Open the contents of the file at the given path for reading
    pub fn open_file<P>(&self, path: P) -> Result<File<'_, R>>
    where P: AsRef<Path>
    {
        self.lookup(path)?.open()
    }

    /// Open the contents of the file described by the given Inode for reading
    pub fn open_file_inode(&self, inode: Arc<Inode>) -> Result<File<'_, R>> {
        File::new(self, inode)
    }

    fn dir_tables(&self, inode: &Inode) -> Result<Vec<DirTable>> {
        let info = inode.dir_layout().ok_or(Error::NotADirectory)?;
        // Empty directories have no listing, and possibly no directory table at all
        if info.file_size <= 3 {
            return Ok(Vec::new());
        }
        let entry_ref = EntryReference::new(info.block_index.into(), info.block_offset);
        let mut reader = self.store.metadata_reader(self.sb.dir_table, entry_ref)?;
        DirTable::read_for_dir(&mut reader, &info).map_err(|e| match e {
            Error::Read(source) => Error::MalformedDirectory(format!("listing at {entry_ref:?}: {source}")),
            e => e,
        })
    }

    pub(crate) fn store(&self) -> &BlockStore<R> {
        &self.store
    }

    pub(crate) fn fragment(&self, index: u32) -> Result<FragmentEntry> {
        self.frag_table.get(index)
    }

    pub(crate) fn id(&self, index: u16) -> Result<u32> {
        self.id_table.get(index)
    }

    pub(crate) fn xattrs(&self, inode: &Inode) -> Result<BTreeMap<String, String>> {
        let index = match inode.xattr_index() {
            Some(index) => index,
            None => return Ok(BTreeMap::new()),
        };
        match &self.xattr_table {
            Some(table) => table.get(&self.store, index),
            None => Err(Error::MalformedTable(format!(
                "inode {} has xattr index {index} but the image has no xattr table", inode.inode_number()
            ))),
        }
    }
}
