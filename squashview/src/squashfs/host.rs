//! Device-number and ownership lookups on host paths.
//!
//! Extraction uses these when it meets special files. Platforms without the underlying facility
//! report [`Error::NotImplemented`]; [`or_zeroed`] turns that into zero values so callers can carry
//! on with empty metadata.

use std::path::Path;

use log::debug;

use super::error::{Error, Result};

/// Ownership and link count of a host path
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkInfo {
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
}

/// Split a packed device number into (major, minor).
///
/// Accepts both the 32-bit encoding stored in SquashFS device inodes and the 64-bit `st_rdev`
/// encoding used by glibc; the former is the low half of the latter.
pub fn split_device_number(dev: u64) -> (u32, u32) {
    let major = ((dev >> 8) & 0xfff) | ((dev >> 32) & 0xffff_f000);
    let minor = (dev & 0xff) | ((dev >> 12) & 0xffff_ff00);
    (major as u32, minor as u32)
}

/// Major and minor device numbers of the device node at `path`
#[cfg(unix)]
pub fn device_numbers<P: AsRef<Path>>(path: P) -> Result<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    let md = std::fs::symlink_metadata(path)?;
    Ok(split_device_number(md.rdev()))
}

#[cfg(not(unix))]
pub fn device_numbers<P: AsRef<Path>>(_path: P) -> Result<(u32, u32)> {
    Err(Error::NotImplemented("device numbers"))
}

/// Link count, owner and group of `path`
#[cfg(unix)]
pub fn link_info<P: AsRef<Path>>(path: P) -> Result<LinkInfo> {
    use std::os::unix::fs::MetadataExt;
    let md = std::fs::symlink_metadata(path)?;
    Ok(LinkInfo { nlink: md.nlink(), uid: md.uid(), gid: md.gid() })
}

#[cfg(not(unix))]
pub fn link_info<P: AsRef<Path>>(_path: P) -> Result<LinkInfo> {
    Err(Error::NotImplemented("link count and ownership"))
}

/// Treat an unsupported lookup as zero-valued metadata. Other errors pass through.
pub fn or_zeroed<T: Default>(res: Result<T>) -> Result<T> {
    match res {
        Err(Error::NotImplemented(what)) => {
            debug!("host lookup of {what} not available on this platform, using zero values");
            Ok(T::default())
        },
        res => res,
    }
}
