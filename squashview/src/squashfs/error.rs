//! Error type shared by every part of the decoder.
//!
//! Decoding and corruption errors carry the on-disk position where they were detected. Storage
//! errors carry the offset of the read that failed. End-of-file is never an error: readers
//! report it by returning `Ok(0)`.

use std::io;

use thiserror::Error;

use super::superblock::Compressor;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding a SquashFS image.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying storage failed while reading at `offset`.
    #[error("I/O error reading at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// A decoded record ended early or a stream reader failed.
    #[error("read error: {0}")]
    Read(#[source] io::Error),

    #[error("bad superblock magic {0:#010x}")]
    BadMagic(u32),

    #[error("unsupported SquashFS version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("invalid superblock: {0}")]
    InvalidSuperblock(String),

    #[error("malformed inode: {0}")]
    MalformedInode(String),

    #[error("malformed directory: {0}")]
    MalformedDirectory(String),

    #[error("malformed lookup table: {0}")]
    MalformedTable(String),

    /// A data, fragment or metadata block is inconsistent with the filesystem configuration.
    #[error("corrupt filesystem: block at {position}: {reason}")]
    CorruptBlock { position: u64, reason: String },

    #[error("failed to decompress block at {position}: {source}")]
    Decompress {
        position: u64,
        #[source]
        source: io::Error,
    },

    #[error("unsupported compression {0:?}")]
    UnsupportedCompression(Compressor),

    #[error("not implemented on this platform: {0}")]
    NotImplemented(&'static str),

    #[error("not a symlink")]
    NotASymlink,

    #[error("not a regular file")]
    NotARegularFile,

    #[error("not a directory")]
    NotADirectory,

    #[error("no such file or directory: {0}")]
    NotFound(String),

    #[error("too many levels of symbolic links")]
    TooManyLinks,

    #[error("read-only filesystem")]
    ReadOnlyFilesystem,

    #[error("handle closed")]
    HandleClosed,

    #[error("seek before start of file")]
    SeekBeforeStart,

    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl Error {
    pub(crate) fn corrupt(position: u64, reason: impl Into<String>) -> Self {
        Error::CorruptBlock { position, reason: reason.into() }
    }

    fn kind(&self) -> io::ErrorKind {
        match self {
            Error::Io { source, .. } | Error::Read(source) => source.kind(),
            Error::NotFound(_) => io::ErrorKind::NotFound,
            Error::NotASymlink
            | Error::NotARegularFile
            | Error::NotADirectory
            | Error::SeekBeforeStart => io::ErrorKind::InvalidInput,
            Error::ReadOnlyFilesystem
            | Error::UnsupportedCompression(_)
            | Error::NotImplemented(_) => io::ErrorKind::Unsupported,
            Error::HandleClosed | Error::Internal(_) | Error::TooManyLinks => io::ErrorKind::Other,
            _ => io::ErrorKind::InvalidData,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.kind(), err)
    }
}

// Errors that took a detour through io::Read (e.g. the metadata reader feeding byteorder) come
// back out as the original variant.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Read(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            _ => Error::Internal("lost wrapped decoder error"),
        }
    }
}
