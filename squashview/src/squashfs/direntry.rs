use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use log::warn;

use super::error::{Error, Result};
use super::filedata::File;
use super::host;
use super::metadata::{DirTable, DirTableEntry, EntryReference, FileType, Inode, InodeType};
use super::readermux::ReadAt;
use super::squashfs::SquashFS;

#[cfg(unix)]
pub(crate) fn os_str_from_bytes(b: &[u8]) -> Cow<'_, OsStr> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(OsStr::from_bytes(b))
}

#[cfg(not(unix))]
pub(crate) fn os_str_from_bytes(b: &[u8]) -> Cow<'_, OsStr> {
    match String::from_utf8_lossy(b) {
        Cow::Borrowed(s) => Cow::Borrowed(OsStr::new(s)),
        Cow::Owned(s) => Cow::Owned(s.into()),
    }
}

/// A DirEntry, like in std::fs, represents a named inode within a directory. For example, a
/// filename together with the file's metadata.
///
/// Entries borrow the [`SquashFS`] they came from and cannot outlive it.
pub struct DirEntry<'a, R> {
    sqfs: &'a SquashFS<R>,
    name: Vec<u8>,
    inode_ref: EntryReference,
    inode: Arc<Inode>,
    size: u64,
    mtime: u32,
    permissions: u16,
    uid: u32,
    gid: u32,
    xattrs: BTreeMap<String, String>,
    is_dir: bool,
}

impl<'a, R: ReadAt> DirEntry<'a, R> {
    pub(crate) fn new(sqfs: &'a SquashFS<R>, name: Vec<u8>, inode_ref: EntryReference, inode: Arc<Inode>) -> Result<Self> {
        let uid = sqfs.id(inode.uid_index())?;
        let gid = sqfs.id(inode.gid_index())?;
        let xattrs = sqfs.xattrs(&inode)?;
        Ok(Self {
            sqfs,
            name,
            inode_ref,
            size: inode.file_size(),
            mtime: inode.mtime(),
            permissions: inode.permissions(),
            uid,
            gid,
            xattrs,
            is_dir: inode.is_dir(),
            inode,
        })
    }

    pub(crate) fn from_table(sqfs: &'a SquashFS<R>, start: u32, base_inode_number: u32, entry: &DirTableEntry) -> Result<Self> {
        let inode_ref = entry.inode_ref(start);
        let inode = sqfs.shared_inode(inode_ref)?;
        if entry.inode_type != InodeType::Unknown && entry.inode_type.file_type() != inode.file_type() {
            warn!(
                "entry {:?} is listed as {:?} but its inode is {:?}",
                String::from_utf8_lossy(&entry.name), entry.inode_type, inode.inode_type(),
            );
        }
        let listed_number = entry.inode_number(base_inode_number);
        if listed_number != inode.inode_number() {
            warn!(
                "entry {:?} is listed as inode {listed_number} but references inode {}",
                String::from_utf8_lossy(&entry.name), inode.inode_number(),
            );
        }
        Self::new(sqfs, entry.name.clone(), inode_ref, inode)
    }

    /// The entry name, lossily converted to UTF-8
    pub fn file_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// The entry name exactly as stored
    pub fn name_bytes(&self) -> &[u8] {
        &self.name
    }

    pub fn name_os(&self) -> Cow<'_, OsStr> {
        os_str_from_bytes(&self.name)
    }

    /// Declared size: content length for files, listing size for directories, target length for
    /// symlinks
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Permission bits combined with the type bits of the inode's variant
    pub fn mode(&self) -> u32 {
        (u32::from(self.permissions) & 0o7777) | self.inode.file_type().mode_bits()
    }

    pub fn permissions(&self) -> u16 {
        self.permissions & 0o7777
    }

    pub fn mtime(&self) -> u32 {
        self.mtime
    }

    pub fn modified(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.mtime.into())
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn is_file(&self) -> bool {
        self.inode.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.inode.is_symlink()
    }

    pub fn file_type(&self) -> FileType {
        self.inode.file_type()
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn xattrs(&self) -> &BTreeMap<String, String> {
        &self.xattrs
    }

    pub fn inode(&self) -> &Inode {
        &self.inode
    }

    pub fn inode_ref(&self) -> EntryReference {
        self.inode_ref
    }

    pub fn inode_number(&self) -> u32 {
        self.inode.inode_number()
    }

    pub fn link_count(&self) -> u32 {
        self.inode.link_count()
    }

    /// Major and minor numbers of a block or character device
    pub fn device_numbers(&self) -> Option<(u32, u32)> {
        self.inode.device_number().map(|dev| host::split_device_number(dev.into()))
    }

    /// The target of a symbolic link
    pub fn read_link(&self) -> Result<PathBuf> {
        let target = self.inode.symlink_target().ok_or(Error::NotASymlink)?;
        Ok(PathBuf::from(os_str_from_bytes(target).into_owned()))
    }

    /// Open the contents of a regular file for reading
    pub fn open(&self) -> Result<File<'a, R>> {
        File::new(self.sqfs, Arc::clone(&self.inode))
    }

    /// Iterate the entries of a directory
    pub fn read_dir(&self) -> Result<ReadDir<'a, R>> {
        self.sqfs.read_dir_inode(&self.inode)
    }
}

impl<'a, R> Clone for DirEntry<'a, R> {
    fn clone(&self) -> Self {
        Self {
            sqfs: self.sqfs,
            name: self.name.clone(),
            inode_ref: self.inode_ref,
            inode: Arc::clone(&self.inode),
            size: self.size,
            mtime: self.mtime,
            permissions: self.permissions,
            uid: self.uid,
            gid: self.gid,
            xattrs: self.xattrs.clone(),
            is_dir: self.is_dir,
        }
    }
}

// Entries from different mounts of the same image compare equal
impl<'a, 'b, R, S> PartialEq<DirEntry<'b, S>> for DirEntry<'a, R> {
    fn eq(&self, other: &DirEntry<'b, S>) -> bool {
        self.inode == other.inode
            && self.name == other.name
            && self.size == other.size
            && self.mtime == other.mtime
            && self.permissions & 0o7777 == other.permissions & 0o7777
            && self.is_dir == other.is_dir
    }
}

impl<'a, R> fmt::Debug for DirEntry<'a, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &String::from_utf8_lossy(&self.name))
            .field("inode_ref", &self.inode_ref)
            .field("size", &self.size)
            .field("mtime", &self.mtime)
            .field("permissions", &format_args!("{:o}", self.permissions))
            .field("uid", &self.uid)
            .field("gid", &self.gid)
            .field("is_dir", &self.is_dir)
            .finish()
    }
}

/// An iterator over the individual DirEntries in a directory
// This iterator combines DirEntries from a list of DirEntry runs. The SquashFS filesystem
// potentially splits the DirEntries for a directory table across multiple runs, so this object must
// combine walking of both runs and entries into the next() Iterator function.
pub struct ReadDir<'a, R> {
    sqfs: &'a SquashFS<R>,
    table_iter: std::vec::IntoIter<DirTable>,
    cur_iter: Option<std::vec::IntoIter<DirTableEntry>>,
    cur_start: u32,
    cur_inode_num: u32,
}

impl<'a, R: ReadAt> ReadDir<'a, R> {
    pub(crate) fn new(sqfs: &'a SquashFS<R>, tables: Vec<DirTable>) -> Self {
        ReadDir { sqfs, table_iter: tables.into_iter(), cur_iter: None, cur_start: 0, cur_inode_num: 0 }
    }
}

impl<'a, R: ReadAt> Iterator for ReadDir<'a, R> {
    type Item = Result<DirEntry<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.cur_iter.as_mut().and_then(|i| i.next()) {
                return Some(DirEntry::from_table(self.sqfs, self.cur_start, self.cur_inode_num, &e));
            }
            let t = self.table_iter.next()?;
            self.cur_start = t.start;
            self.cur_inode_num = t.inode_number;
            self.cur_iter = Some(t.entries.into_iter());
        }
    }
}

impl<'a, R> fmt::Debug for ReadDir<'a, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadDir")
            .field("remaining_runs", &self.table_iter.len())
            .finish()
    }
}
