mod block;
mod compressed;
mod direntry;
mod filedata;
mod readermux;
mod squashfs;
mod xattr;

pub mod cache;
pub mod error;
pub mod host;
pub mod metadata;
pub mod path;
pub mod superblock;

pub use squashfs::*;
pub use direntry::{DirEntry, ReadDir};
pub use error::{Error, Result};
pub use filedata::File;
pub use metadata::{EntryReference, FileType, Inode};
pub use readermux::{FileSource, ReadAt, ReaderMux};
pub use superblock::{Compressor, Superblock};
