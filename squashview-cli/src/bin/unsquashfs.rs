use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use log::{info, warn, LevelFilter};
use squashview::squashfs::{host, DirEntry, FileSource, FileType, Options, SquashFS};

#[derive(Parser, Debug)]
struct Args {
    filesystem: PathBuf,
    files: Vec<PathBuf>,

    #[clap(short, long="dest", default_value="squashfs-root")]
    dir: PathBuf,

    #[clap(short, action)]
    list_filesystem: bool,

    #[clap(long="cat", action)]
    cat_files: bool,

    /// Byte offset of the filesystem within the file
    #[clap(long, default_value_t = 0)]
    offset: u64,

    /// Increase logging verbosity
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let sqfs = SquashFS::open_with(&args.filesystem, Options::new().offset(args.offset))
        .context("Failed to open SquashFS")?;

    let file_list = if args.files.is_empty() {
        vec![args.dir.clone()]
    } else {
        args.files.iter()
            .map(|f| args.dir.join(f.strip_prefix("/").unwrap_or(f)))
            .collect()
    };

    if args.list_filesystem {
        println!("{}", args.dir.display());
    } else if !args.cat_files {
        fs::create_dir_all(&args.dir)
            .with_context(|| format!("cannot create '{}'", args.dir.display()))?;
    }

    let mut extracted = 0;
    for d in sqfs.root()?.read_dir()? {
        extracted += descend(&args, &file_list, &args.dir, &d?)?;
    }
    if !args.list_filesystem && !args.cat_files {
        info!("created {extracted} entries under {}", args.dir.display());
    }
    Ok(())
}

fn descend(args: &Args, files: &[PathBuf], parent: &Path, d: &DirEntry<'_, FileSource>) -> anyhow::Result<u32> {
    let path = parent.join(d.name_os());

    if !files.iter().any(|p| path.starts_with(p) || p.starts_with(&path)) {
        return Ok(0);
    }

    let mut count = 0;
    if args.list_filesystem {
        println!("{}", path.display());
    } else if args.cat_files {
        if d.is_file() {
            let mut r = d.open()?;
            let mut stdout = io::stdout().lock();
            io::copy(&mut r, &mut stdout)?;
            stdout.flush()?;
        }
    } else if extract(d, &path)? {
        count += 1;
    }

    if d.is_dir() {
        for child in d.read_dir()? {
            count += descend(args, files, &path, &child?)?;
        }
        // Applied last so read-only directories can still be filled
        if !args.list_filesystem && !args.cat_files {
            set_permissions(&path, d)?;
        }
    }
    Ok(count)
}

/// Create `path` on the host from the entry. Returns false for entries that were skipped.
fn extract(d: &DirEntry<'_, FileSource>, path: &Path) -> anyhow::Result<bool> {
    match d.file_type() {
        FileType::Directory => {
            fs::create_dir_all(path)
                .with_context(|| format!("cannot create directory '{}'", path.display()))?;
            return Ok(true);
        },
        FileType::Regular => {
            let mut out = fs::File::create(path)
                .with_context(|| format!("cannot create '{}'", path.display()))?;
            let mut r = d.open()?;
            io::copy(&mut r, &mut out)
                .with_context(|| format!("failed writing '{}'", path.display()))?;
        },
        FileType::Symlink => {
            let target = d.read_link()?;
            create_symlink(&target, path)
                .with_context(|| format!("cannot create symlink '{}'", path.display()))?;
        },
        _ => {
            skip_special(d, path)?;
            return Ok(false);
        },
    }
    set_permissions(path, d)?;
    Ok(true)
}

// Device nodes, fifos and sockets need privileges or a live listener to recreate
fn skip_special(d: &DirEntry<'_, FileSource>, path: &Path) -> anyhow::Result<()> {
    let (major, minor) = d.device_numbers().unwrap_or_default();
    if fs::symlink_metadata(path).is_ok() {
        let existing = host::or_zeroed(host::device_numbers(path))?;
        if d.device_numbers().is_some() && existing != (major, minor) {
            warn!(
                "'{}' exists as device {}:{} but the image has {major}:{minor}",
                path.display(), existing.0, existing.1,
            );
        }
        return Ok(());
    }
    warn!("skipping {:?} '{}'", d.file_type(), path.display());
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn create_symlink(target: &Path, path: &Path) -> io::Result<()> {
    warn!("symbolic links unsupported here, skipping '{}' -> '{}'", path.display(), target.display());
    Ok(())
}

#[cfg(unix)]
fn set_permissions(path: &Path, d: &DirEntry<'_, FileSource>) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if d.is_symlink() {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(d.permissions().into()))
        .with_context(|| format!("cannot set mode of '{}'", path.display()))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _d: &DirEntry<'_, FileSource>) -> anyhow::Result<()> {
    Ok(())
}
