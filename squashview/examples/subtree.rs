/// Read every file below a path of a SquashFS, splitting the work across threads that share one
/// mounted filesystem and its block cache
use std::env;
use std::sync::Arc;
use std::thread;

use anyhow::{self, Context};
use squashview::squashfs::{self, SquashFS};

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let sqfs_path = args.next().context("usage: subtree <image> [path] [threads]")?;
    let p = args.next().unwrap_or_else(|| "/".into());
    let threads: usize = args.next().map(|t| t.parse()).transpose()?.unwrap_or(4);

    let sqfs = SquashFS::open(&sqfs_path)?;
    let top = sqfs.lookup(&p)?;
    if !top.is_dir() {
        anyhow::bail!("{p} is not a directory");
    }

    // Collect file inodes, then read them in parallel
    let mut files = Vec::new();
    let mut nodes = vec![top];
    while let Some(node) = nodes.pop() {
        for de in node.read_dir()? {
            let de = de?;
            if de.is_file() {
                files.push(Arc::new(de.inode().clone()));
            } else if de.is_dir() {
                nodes.push(de);
            }
        }
    }

    let sqfs = &sqfs;
    let total: u64 = thread::scope(|s| {
        let handles: Vec<_> = files.chunks(files.len().div_ceil(threads.max(1)).max(1))
            .map(|chunk| s.spawn(move || read_all(sqfs, chunk)))
            .collect();
        handles.into_iter()
            .map(|h| h.join().map_err(|_| anyhow::anyhow!("reader thread panicked"))?)
            .sum::<anyhow::Result<u64>>()
    })?;

    println!("{} files, {total} bytes, {} blocks cached", files.len(), sqfs.cache().len());
    Ok(())
}

fn read_all(sqfs: &SquashFS<squashfs::FileSource>, inodes: &[Arc<squashfs::Inode>]) -> anyhow::Result<u64> {
    let mut total = 0;
    for inode in inodes {
        let mut r = sqfs.open_file_inode(Arc::clone(inode))?;
        total += std::io::copy(&mut r, &mut std::io::sink())?;
    }
    Ok(total)
}
