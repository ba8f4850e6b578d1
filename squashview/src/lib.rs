//! Squashview provides a read-only view of SquashFS 4.0 images. The API focuses on performing
//! typical filesystem operations such as listing directory contents, reading files, reading
//! symbolic links and extended attributes.
//!
//! A [`SquashFS`](squashfs::SquashFS) takes `&self` everywhere. Directory entries and open files
//! borrow it, and decompressed blocks are shared between all of them through one bounded cache,
//! so many files can be read at once, from several threads.
//!
//! ## Feature Flags
//! - `gzip` (default): zlib-compressed images, via flate2
//! - `xz` (default): xz-compressed images, via lzma-rs
//! - `zstd` (default): zstd-compressed images, via ruzstd
//!
//! Images using lzo, lz4 or legacy lzma compression can be mounted, but reading any compressed
//! block from them fails with [`Error::UnsupportedCompression`](squashfs::Error::UnsupportedCompression).
//!
//! ## Usage Example
//! ```no_run
//! use std::io;
//! use squashview::squashfs::SquashFS;
//! fn print_file_from_squashfs() -> anyhow::Result<()> {
//!     // Open the SquashFS
//!     let sqfs = SquashFS::open("rootfs.squashfs")?;
//!
//!     // List the contents of a directory
//!     for d in sqfs.read_dir("/etc")? {
//!         println!("{}", d?.file_name())
//!     }
//!
//!     // Open a file to read its contents
//!     let mut file_reader = sqfs.open_file("/etc/group")?;
//!
//!     // Copy the file contents to stdout
//!     let mut stdout = io::stdout().lock();
//!     io::copy(&mut file_reader, &mut stdout)?;
//!     Ok(())
//! }
//! ```

pub mod squashfs;
