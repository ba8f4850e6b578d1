//! Builds small SquashFS 4.0 images in memory, laid out the way mksquashfs lays them out:
//! superblock, data and fragment blocks, inode table, directory table, then the lookup tables.
#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{write::ZlibEncoder, Compression};

pub const GZIP: u16 = 1;
pub const LZ4: u16 = 5;

const METADATA_BLOCK_SIZE: usize = 8192;
const UNCOMPRESSED_DATA: u32 = 1 << 24;
const UNCOMPRESSED_METADATA: u16 = 0x8000;
const NONE: u64 = u64::MAX;

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data).unwrap();
    enc.finish().unwrap()
}

/// Deterministic, poorly compressible test content
pub fn noise(len: usize, seed: u32) -> Vec<u8> {
    let mut x = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len).map(|_| {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        x as u8
    }).collect()
}

/// Highly compressible test content
pub fn text(len: usize) -> Vec<u8> {
    b"the quick brown fox jumps over the lazy dog\n".iter().copied().cycle().take(len).collect()
}

#[derive(Debug, Clone)]
pub enum Kind {
    Dir(Vec<Entry>),
    File(Vec<u8>),
    Symlink(Vec<u8>),
    BlockDev(u32),
    CharDev(u32),
    Fifo,
    Socket,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: Vec<u8>,
    pub kind: Kind,
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub mtime: u32,
    pub xattrs: Vec<(String, Vec<u8>)>,
}

impl Entry {
    fn new(name: &str, kind: Kind, mode: u16) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            kind,
            mode,
            uid: 0,
            gid: 0,
            mtime: 1_700_000_000,
            xattrs: Vec::new(),
        }
    }

    pub fn dir(name: &str, children: Vec<Entry>) -> Self {
        Self::new(name, Kind::Dir(children), 0o755)
    }

    pub fn file(name: &str, data: impl Into<Vec<u8>>) -> Self {
        Self::new(name, Kind::File(data.into()), 0o644)
    }

    pub fn symlink(name: &str, target: &str) -> Self {
        Self::new(name, Kind::Symlink(target.as_bytes().to_vec()), 0o777)
    }

    pub fn block_dev(name: &str, dev: u32) -> Self {
        Self::new(name, Kind::BlockDev(dev), 0o660)
    }

    pub fn char_dev(name: &str, dev: u32) -> Self {
        Self::new(name, Kind::CharDev(dev), 0o666)
    }

    pub fn fifo(name: &str) -> Self {
        Self::new(name, Kind::Fifo, 0o644)
    }

    pub fn socket(name: &str) -> Self {
        Self::new(name, Kind::Socket, 0o755)
    }

    /// Stored mode. Type bits are added from the kind unless `mode` already carries some.
    pub fn mode(mut self, mode: u16) -> Self {
        self.mode = mode;
        self
    }

    pub fn owner(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn mtime(mut self, mtime: u32) -> Self {
        self.mtime = mtime;
        self
    }

    pub fn xattr(mut self, name: &str, value: &[u8]) -> Self {
        self.xattrs.push((name.to_string(), value.to_vec()));
        self
    }

    fn count(&self) -> u32 {
        match &self.kind {
            Kind::Dir(children) => 1 + children.iter().map(Entry::count).sum::<u32>(),
            _ => 1,
        }
    }

    // Basic inode type tag; extended tags are 7 higher
    fn basic_type(&self) -> u16 {
        match &self.kind {
            Kind::Dir(_) => 1,
            Kind::File(_) => 2,
            Kind::Symlink(_) => 3,
            Kind::BlockDev(_) => 4,
            Kind::CharDev(_) => 5,
            Kind::Fifo => 6,
            Kind::Socket => 7,
        }
    }

    fn type_bits(&self) -> u16 {
        match &self.kind {
            Kind::Dir(_) => 0o040000,
            Kind::File(_) => 0o100000,
            Kind::Symlink(_) => 0o120000,
            Kind::BlockDev(_) => 0o060000,
            Kind::CharDev(_) => 0o020000,
            Kind::Fifo => 0o010000,
            Kind::Socket => 0o140000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImageBuilder {
    pub block_size: u32,
    pub compressor_id: u16,
    pub compress_data: bool,
    pub compress_metadata: bool,
    pub fragments: bool,
    pub extended: bool,
    pub export_table: bool,
    pub sparse: bool,
    pub root_mode: u16,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self {
            block_size: 4096,
            compressor_id: GZIP,
            compress_data: true,
            compress_metadata: true,
            fragments: true,
            extended: false,
            export_table: false,
            sparse: false,
            root_mode: 0o755,
        }
    }
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    /// Superblock compressor id. Whatever it says, blocks are compressed with zlib.
    pub fn compressor_id(mut self, id: u16) -> Self {
        self.compressor_id = id;
        self
    }

    pub fn compress_data(mut self, yes: bool) -> Self {
        self.compress_data = yes;
        self
    }

    pub fn compress_metadata(mut self, yes: bool) -> Self {
        self.compress_metadata = yes;
        self
    }

    pub fn fragments(mut self, yes: bool) -> Self {
        self.fragments = yes;
        self
    }

    pub fn extended(mut self, yes: bool) -> Self {
        self.extended = yes;
        self
    }

    pub fn export_table(mut self, yes: bool) -> Self {
        self.export_table = yes;
        self
    }

    pub fn sparse(mut self, yes: bool) -> Self {
        self.sparse = yes;
        self
    }

    pub fn build(&self, children: Vec<Entry>) -> Vec<u8> {
        let root = Entry::dir("", children).mode(self.root_mode);
        let inode_count = root.count();
        let mut w = Writer::new(self, inode_count);
        let (root_ref, _, _) = w.write_entry(&root, 1, inode_count + 1);
        w.finish(root_ref, inode_count)
    }
}

/// Writes a stream of metadata blocks, handing out references into it
struct MetadataWriter {
    compress: bool,
    out: Vec<u8>,
    pending: Vec<u8>,
    written: u64,
}

impl MetadataWriter {
    fn new(compress: bool) -> Self {
        Self { compress, out: Vec::new(), pending: Vec::new(), written: 0 }
    }

    /// (block start relative to the stream, offset within the uncompressed block)
    fn position(&self) -> (u64, u16) {
        (self.out.len() as u64, self.pending.len() as u16)
    }

    fn reference(&self) -> u64 {
        let (block, offset) = self.position();
        block << 16 | u64::from(offset)
    }

    fn write(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        self.written += data.len() as u64;
        while self.pending.len() >= METADATA_BLOCK_SIZE {
            let rest = self.pending.split_off(METADATA_BLOCK_SIZE);
            let block = std::mem::replace(&mut self.pending, rest);
            self.flush_block(&block);
        }
    }

    fn flush_block(&mut self, block: &[u8]) {
        let compressed = if self.compress { Some(zlib(block)) } else { None };
        match compressed {
            Some(z) if z.len() < block.len() => {
                self.out.write_u16::<LittleEndian>(z.len() as u16).unwrap();
                self.out.extend_from_slice(&z);
            },
            _ => {
                self.out.write_u16::<LittleEndian>(UNCOMPRESSED_METADATA | block.len() as u16).unwrap();
                self.out.extend_from_slice(block);
            },
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if !self.pending.is_empty() {
            let block = std::mem::take(&mut self.pending);
            self.flush_block(&block);
        }
        self.out
    }
}

struct Writer<'b> {
    opts: &'b ImageBuilder,
    image: Vec<u8>,
    frag_buf: Vec<u8>,
    fragments: Vec<(u64, u32)>,
    inodes: MetadataWriter,
    dirs: MetadataWriter,
    ids: Vec<u32>,
    xattr_kv: MetadataWriter,
    xattr_lookup: Vec<u8>,
    xattr_count: u32,
    xattr_values: HashMap<Vec<u8>, u64>,
    export: Vec<u64>,
}

impl<'b> Writer<'b> {
    fn new(opts: &'b ImageBuilder, inode_count: u32) -> Self {
        Self {
            opts,
            image: vec![0u8; 96],
            frag_buf: Vec::new(),
            fragments: Vec::new(),
            inodes: MetadataWriter::new(opts.compress_metadata),
            dirs: MetadataWriter::new(opts.compress_metadata),
            ids: Vec::new(),
            xattr_kv: MetadataWriter::new(opts.compress_metadata),
            xattr_lookup: Vec::new(),
            xattr_count: 0,
            xattr_values: HashMap::new(),
            export: vec![0; inode_count as usize],
        }
    }

    fn id_index(&mut self, id: u32) -> u16 {
        match self.ids.iter().position(|x| *x == id) {
            Some(i) => i as u16,
            None => {
                self.ids.push(id);
                (self.ids.len() - 1) as u16
            },
        }
    }

    fn encode_block(&self, chunk: &[u8]) -> (Vec<u8>, u32) {
        if self.opts.compress_data {
            let z = zlib(chunk);
            if z.len() < chunk.len() {
                let len = z.len() as u32;
                return (z, len);
            }
        }
        (chunk.to_vec(), chunk.len() as u32 | UNCOMPRESSED_DATA)
    }

    fn flush_fragment(&mut self) {
        if self.frag_buf.is_empty() {
            return;
        }
        let buf = std::mem::take(&mut self.frag_buf);
        let (bytes, desc) = self.encode_block(&buf);
        self.fragments.push((self.image.len() as u64, desc));
        self.image.extend_from_slice(&bytes);
    }

    fn write_xattrs(&mut self, attrs: &[(String, Vec<u8>)]) -> u32 {
        let start_ref = self.xattr_kv.reference();
        let start_len = self.xattr_kv.written;
        for (name, value) in attrs {
            let (prefix, rest) = if let Some(rest) = name.strip_prefix("user.") {
                (0u16, rest)
            } else if let Some(rest) = name.strip_prefix("trusted.") {
                (1, rest)
            } else if let Some(rest) = name.strip_prefix("security.") {
                (2, rest)
            } else {
                panic!("unsupported xattr namespace in {name}");
            };
            let mut key = Vec::new();
            match self.xattr_values.get(value) {
                Some(&value_ref) => {
                    key.write_u16::<LittleEndian>(prefix | 0x100).unwrap();
                    key.write_u16::<LittleEndian>(rest.len() as u16).unwrap();
                    key.extend_from_slice(rest.as_bytes());
                    key.write_u32::<LittleEndian>(8).unwrap();
                    key.write_u64::<LittleEndian>(value_ref).unwrap();
                    self.xattr_kv.write(&key);
                },
                None => {
                    key.write_u16::<LittleEndian>(prefix).unwrap();
                    key.write_u16::<LittleEndian>(rest.len() as u16).unwrap();
                    key.extend_from_slice(rest.as_bytes());
                    self.xattr_kv.write(&key);
                    self.xattr_values.insert(value.clone(), self.xattr_kv.reference());
                    let mut v = Vec::new();
                    v.write_u32::<LittleEndian>(value.len() as u32).unwrap();
                    v.extend_from_slice(value);
                    self.xattr_kv.write(&v);
                },
            }
        }
        let size = (self.xattr_kv.written - start_len) as u32;
        self.xattr_lookup.write_u64::<LittleEndian>(start_ref).unwrap();
        self.xattr_lookup.write_u32::<LittleEndian>(attrs.len() as u32).unwrap();
        self.xattr_lookup.write_u32::<LittleEndian>(size).unwrap();
        self.xattr_count += 1;
        self.xattr_count - 1
    }

    /// Write the entry (and, for directories, everything below it). Inode numbers are assigned
    /// in post-order starting at `first_number`. Returns (inode ref, inode number, basic type).
    fn write_entry(&mut self, entry: &Entry, first_number: u32, parent_number: u32) -> (u64, u32, u16) {
        let number = first_number + entry.count() - 1;
        let xattr = if entry.xattrs.is_empty() { u32::MAX } else { self.write_xattrs(&entry.xattrs) };
        let extended = self.opts.extended || xattr != u32::MAX;

        // Type specific payload, and whether it forces the extended layout
        let (payload, ext) = match &entry.kind {
            Kind::Dir(children) => self.write_dir(children, number, parent_number, extended, xattr),
            Kind::File(data) => self.write_file(data, extended, xattr),
            Kind::Symlink(target) => {
                let mut p = Vec::new();
                p.write_u32::<LittleEndian>(1).unwrap();
                p.write_u32::<LittleEndian>(target.len() as u32).unwrap();
                p.extend_from_slice(target);
                if extended {
                    p.write_u32::<LittleEndian>(xattr).unwrap();
                }
                (p, extended)
            },
            Kind::BlockDev(dev) | Kind::CharDev(dev) => {
                let mut p = Vec::new();
                p.write_u32::<LittleEndian>(1).unwrap();
                p.write_u32::<LittleEndian>(*dev).unwrap();
                if extended {
                    p.write_u32::<LittleEndian>(xattr).unwrap();
                }
                (p, extended)
            },
            Kind::Fifo | Kind::Socket => {
                let mut p = Vec::new();
                p.write_u32::<LittleEndian>(1).unwrap();
                if extended {
                    p.write_u32::<LittleEndian>(xattr).unwrap();
                }
                (p, extended)
            },
        };

        let stored_mode = if entry.mode & 0o170000 != 0 { entry.mode } else { entry.mode | entry.type_bits() };
        let tag = entry.basic_type() + if ext { 7 } else { 0 };
        let uid = self.id_index(entry.uid);
        let gid = self.id_index(entry.gid);

        let inode_ref = self.inodes.reference();
        let mut inode = Vec::new();
        inode.write_u16::<LittleEndian>(tag).unwrap();
        inode.write_u16::<LittleEndian>(stored_mode).unwrap();
        inode.write_u16::<LittleEndian>(uid).unwrap();
        inode.write_u16::<LittleEndian>(gid).unwrap();
        inode.write_u32::<LittleEndian>(entry.mtime).unwrap();
        inode.write_u32::<LittleEndian>(number).unwrap();
        inode.extend_from_slice(&payload);
        self.inodes.write(&inode);
        self.export[number as usize - 1] = inode_ref;
        (inode_ref, number, entry.basic_type())
    }

    fn write_file(&mut self, data: &[u8], extended: bool, xattr: u32) -> (Vec<u8>, bool) {
        let bs = self.opts.block_size as usize;
        let tail = if self.opts.fragments { data.len() % bs } else { 0 };
        let blocks_start = self.image.len() as u64;

        let mut descriptors = Vec::new();
        let mut sparse = 0u64;
        for chunk in data[..data.len() - tail].chunks(bs) {
            if self.opts.sparse && chunk.len() == bs && chunk.iter().all(|b| *b == 0) {
                descriptors.push(0);
                sparse += bs as u64;
                continue;
            }
            let (bytes, desc) = self.encode_block(chunk);
            self.image.extend_from_slice(&bytes);
            descriptors.push(desc);
        }

        let (frag_index, frag_offset) = if tail > 0 {
            if self.frag_buf.len() + tail > bs {
                self.flush_fragment();
            }
            let r = (self.fragments.len() as u32, self.frag_buf.len() as u32);
            self.frag_buf.extend_from_slice(&data[data.len() - tail..]);
            r
        } else {
            (u32::MAX, 0)
        };

        let ext = extended || sparse > 0;
        let mut p = Vec::new();
        if ext {
            p.write_u64::<LittleEndian>(blocks_start).unwrap();
            p.write_u64::<LittleEndian>(data.len() as u64).unwrap();
            p.write_u64::<LittleEndian>(sparse).unwrap();
            p.write_u32::<LittleEndian>(1).unwrap();
            p.write_u32::<LittleEndian>(frag_index).unwrap();
            p.write_u32::<LittleEndian>(frag_offset).unwrap();
            p.write_u32::<LittleEndian>(xattr).unwrap();
        } else {
            p.write_u32::<LittleEndian>(blocks_start as u32).unwrap();
            p.write_u32::<LittleEndian>(frag_index).unwrap();
            p.write_u32::<LittleEndian>(frag_offset).unwrap();
            p.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        }
        for d in descriptors {
            p.write_u32::<LittleEndian>(d).unwrap();
        }
        (p, ext)
    }

    fn write_dir(&mut self, children: &[Entry], number: u32, parent: u32, extended: bool, xattr: u32) -> (Vec<u8>, bool) {
        let mut sorted: Vec<&Entry> = children.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));

        let mut written = Vec::new();
        let mut next_number = number - (children.iter().map(Entry::count).sum::<u32>());
        for child in &sorted {
            let w = self.write_entry(child, next_number, number);
            next_number += child.count();
            written.push((*child, w));
        }

        // Group entries into runs sharing an inode block and a nearby inode number
        let mut listing = Vec::new();
        let mut i = 0;
        while i < written.len() {
            let (_, (first_ref, first_number, _)) = written[i];
            let start = first_ref >> 16;
            let mut j = i;
            while j < written.len() && j - i < 256 {
                let (_, (r, n, _)) = written[j];
                let delta = i64::from(n) - i64::from(first_number);
                if r >> 16 != start || delta < i64::from(i16::MIN) || delta > i64::from(i16::MAX) {
                    break;
                }
                j += 1;
            }
            listing.write_u32::<LittleEndian>((j - i - 1) as u32).unwrap();
            listing.write_u32::<LittleEndian>(start as u32).unwrap();
            listing.write_u32::<LittleEndian>(first_number).unwrap();
            for (child, (r, n, t)) in &written[i..j] {
                listing.write_u16::<LittleEndian>((r & 0xFFFF) as u16).unwrap();
                listing.write_i16::<LittleEndian>((i64::from(*n) - i64::from(first_number)) as i16).unwrap();
                listing.write_u16::<LittleEndian>(*t).unwrap();
                listing.write_u16::<LittleEndian>((child.name.len() - 1) as u16).unwrap();
                listing.extend_from_slice(&child.name);
            }
            i = j;
        }

        let (block_index, block_offset) = self.dirs.position();
        self.dirs.write(&listing);
        let file_size = listing.len() + 3;
        let subdirs = children.iter().filter(|c| matches!(c.kind, Kind::Dir(_))).count() as u32;
        let link_count = 2 + subdirs;

        let ext = extended || file_size > usize::from(u16::MAX);
        let mut p = Vec::new();
        if ext {
            p.write_u32::<LittleEndian>(link_count).unwrap();
            p.write_u32::<LittleEndian>(file_size as u32).unwrap();
            p.write_u32::<LittleEndian>(block_index as u32).unwrap();
            p.write_u32::<LittleEndian>(parent).unwrap();
            p.write_u16::<LittleEndian>(0).unwrap();
            p.write_u16::<LittleEndian>(block_offset).unwrap();
            p.write_u32::<LittleEndian>(xattr).unwrap();
        } else {
            p.write_u32::<LittleEndian>(block_index as u32).unwrap();
            p.write_u32::<LittleEndian>(link_count).unwrap();
            p.write_u16::<LittleEndian>(file_size as u16).unwrap();
            p.write_u16::<LittleEndian>(block_offset).unwrap();
            p.write_u32::<LittleEndian>(parent).unwrap();
        }
        (p, ext)
    }

    /// Write a lookup table: metadata blocks of packed entries followed by their positions.
    /// Returns the position of the position list.
    fn write_table(&mut self, entries: &[u8]) -> u64 {
        let mut positions = Vec::new();
        for chunk in entries.chunks(METADATA_BLOCK_SIZE) {
            positions.push(self.image.len() as u64);
            let mut w = MetadataWriter::new(self.opts.compress_metadata);
            w.write(chunk);
            let block = w.finish();
            self.image.extend_from_slice(&block);
        }
        let table = self.image.len() as u64;
        for p in positions {
            self.image.write_u64::<LittleEndian>(p).unwrap();
        }
        table
    }

    fn finish(mut self, root_ref: u64, inode_count: u32) -> Vec<u8> {
        self.flush_fragment();

        let inode_table = self.image.len() as u64;
        let inodes = std::mem::replace(&mut self.inodes, MetadataWriter::new(false)).finish();
        self.image.extend_from_slice(&inodes);

        let dir_table = self.image.len() as u64;
        let dirs = std::mem::replace(&mut self.dirs, MetadataWriter::new(false)).finish();
        self.image.extend_from_slice(&dirs);

        let frag_table = if self.fragments.is_empty() {
            NONE
        } else {
            let mut entries = Vec::new();
            for (start, size) in &self.fragments {
                entries.write_u64::<LittleEndian>(*start).unwrap();
                entries.write_u32::<LittleEndian>(*size).unwrap();
                entries.write_u32::<LittleEndian>(0).unwrap();
            }
            self.write_table(&entries)
        };

        let export_table = if self.opts.export_table {
            let mut entries = Vec::new();
            for r in &self.export {
                entries.write_u64::<LittleEndian>(*r).unwrap();
            }
            self.write_table(&entries)
        } else {
            NONE
        };

        let mut ids = Vec::new();
        for id in &self.ids {
            ids.write_u32::<LittleEndian>(*id).unwrap();
        }
        let id_table = self.write_table(&ids);

        let xattr_table = if self.xattr_count == 0 {
            NONE
        } else {
            let kv_start = self.image.len() as u64;
            let kv = std::mem::replace(&mut self.xattr_kv, MetadataWriter::new(false)).finish();
            self.image.extend_from_slice(&kv);
            let lookup = std::mem::take(&mut self.xattr_lookup);
            let mut positions = Vec::new();
            for chunk in lookup.chunks(METADATA_BLOCK_SIZE) {
                positions.push(self.image.len() as u64);
                let mut w = MetadataWriter::new(self.opts.compress_metadata);
                w.write(chunk);
                let block = w.finish();
                self.image.extend_from_slice(&block);
            }
            let table = self.image.len() as u64;
            self.image.write_u64::<LittleEndian>(kv_start).unwrap();
            self.image.write_u32::<LittleEndian>(self.xattr_count).unwrap();
            self.image.write_u32::<LittleEndian>(0).unwrap();
            for p in positions {
                self.image.write_u64::<LittleEndian>(p).unwrap();
            }
            table
        };

        let bytes_used = self.image.len() as u64;
        let mut flags = 0u16;
        if !self.opts.compress_metadata {
            flags |= 0x0001 | 0x0800;
        }
        if !self.opts.compress_data {
            flags |= 0x0002 | 0x0008;
        }
        if !self.opts.fragments {
            flags |= 0x0010;
        }
        if self.opts.export_table {
            flags |= 0x0080;
        }
        if self.xattr_count == 0 {
            flags |= 0x0200;
        }

        let mut sb = Vec::with_capacity(96);
        sb.write_u32::<LittleEndian>(0x7371_7368).unwrap();
        sb.write_u32::<LittleEndian>(inode_count).unwrap();
        sb.write_u32::<LittleEndian>(1_700_000_000).unwrap();
        sb.write_u32::<LittleEndian>(self.opts.block_size).unwrap();
        sb.write_u32::<LittleEndian>(self.fragments.len() as u32).unwrap();
        sb.write_u16::<LittleEndian>(self.opts.compressor_id).unwrap();
        sb.write_u16::<LittleEndian>(self.opts.block_size.trailing_zeros() as u16).unwrap();
        sb.write_u16::<LittleEndian>(flags).unwrap();
        sb.write_u16::<LittleEndian>(self.ids.len() as u16).unwrap();
        sb.write_u16::<LittleEndian>(4).unwrap();
        sb.write_u16::<LittleEndian>(0).unwrap();
        sb.write_u64::<LittleEndian>(root_ref).unwrap();
        sb.write_u64::<LittleEndian>(bytes_used).unwrap();
        for table in [id_table, xattr_table, inode_table, dir_table, frag_table, export_table] {
            sb.write_u64::<LittleEndian>(table).unwrap();
        }
        self.image[..96].copy_from_slice(&sb);

        // Images are padded to a multiple of 4 KiB
        let padded = (self.image.len() + 4095) / 4096 * 4096;
        self.image.resize(padded, 0);
        self.image
    }
}
