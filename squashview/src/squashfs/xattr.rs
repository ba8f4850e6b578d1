//! Extended attribute table.
//!
//! Key/value pairs of all inodes are stored back to back in metadata blocks starting at `kv_start`.
//! An inode's xattr index selects a lookup entry which points at its first pair and gives the
//! pair count. Keys drop their namespace prefix and store it as a small id instead. Values are
//! either inline or, when the out-of-line flag is set on the key, a reference to a value stored
//! earlier in the key/value area.

use std::collections::BTreeMap;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};

use super::block::BlockStore;
use super::error::{Error, Result};
use super::metadata::{EntryReference, FromBytes, LookupTable};
use super::readermux::ReadAt;
use super::superblock::Superblock;

const OUT_OF_LINE: u16 = 0x0100;
// Linux refuses larger values (XATTR_SIZE_MAX)
const MAX_VALUE_SIZE: u32 = 65536;

#[derive(Debug, Clone, Copy)]
pub(crate) struct XattrLookupEntry {
    pub xattr_ref: EntryReference,
    pub count: u32,
}

impl FromBytes for XattrLookupEntry {
    const BYTE_SIZE: usize = 16;
    fn from_bytes(buf: &[u8]) -> Self {
        Self {
            xattr_ref: EntryReference::from_bytes(&buf[0..8]),
            count: LittleEndian::read_u32(&buf[8..12]),
            // buf[12..16] is the total size of the values, unused here
        }
    }
}

fn prefix(kind: u16) -> Result<&'static str> {
    match kind & !OUT_OF_LINE {
        0 => Ok("user."),
        1 => Ok("trusted."),
        2 => Ok("security."),
        other => Err(Error::MalformedTable(format!("unknown xattr prefix id {other}"))),
    }
}

#[derive(Debug)]
pub(crate) struct XattrTable {
    kv_start: u64,
    lu_table: LookupTable<XattrLookupEntry>,
}

impl XattrTable {
    pub fn read<R>(store: &BlockStore<R>, sb: &Superblock) -> Result<Option<Self>>
    where R: ReadAt
    {
        if !sb.has_xattr_table() {
            return Ok(None);
        }
        let mut header = [0u8; 16];
        store.read_raw(sb.xattr_table, &mut header)?;
        let kv_start = LittleEndian::read_u64(&header[0..8]);
        let count = LittleEndian::read_u32(&header[8..12]);
        Ok(Some(Self {
            kv_start,
            lu_table: LookupTable::read(store, sb.xattr_table + 16, count, "xattr")?,
        }))
    }

    /// All attributes of the inode with xattr index `index`, keyed by full name
    pub fn get<R>(&self, store: &BlockStore<R>, index: u32) -> Result<BTreeMap<String, String>>
    where R: ReadAt
    {
        let entry = self.lu_table.entries.get(index as usize).ok_or_else(|| {
            Error::MalformedTable(format!(
                "xattr index {index} out of range ({} entries)", self.lu_table.entries.len()
            ))
        })?;

        let mut attrs = BTreeMap::new();
        let mut r = store.metadata_reader(self.kv_start, entry.xattr_ref)?;
        for _ in 0..entry.count {
            let kind = r.read_u16::<LittleEndian>()?;
            let name_size = r.read_u16::<LittleEndian>()?;
            let mut name = vec![0u8; name_size.into()];
            r.read_exact(&mut name)?;

            let value = if kind & OUT_OF_LINE != 0 {
                let value_size = r.read_u32::<LittleEndian>()?;
                if value_size != 8 {
                    return Err(Error::MalformedTable(format!("out-of-line xattr reference of {value_size} bytes")));
                }
                let value_ref = EntryReference::read(&mut r)?;
                let mut vr = store.metadata_reader(self.kv_start, value_ref)?;
                Self::read_value(&mut vr)?
            } else {
                Self::read_value(&mut r)?
            };

            let key = format!("{}{}", prefix(kind)?, String::from_utf8_lossy(&name));
            attrs.insert(key, String::from_utf8_lossy(&value).into_owned());
        }
        Ok(attrs)
    }

    fn read_value<R: Read>(r: &mut R) -> Result<Vec<u8>> {
        let size = r.read_u32::<LittleEndian>()?;
        if size > MAX_VALUE_SIZE {
            return Err(Error::MalformedTable(format!("xattr value of {size} bytes")));
        }
        let mut value = vec![0u8; size as usize];
        r.read_exact(&mut value)?;
        Ok(value)
    }
}
