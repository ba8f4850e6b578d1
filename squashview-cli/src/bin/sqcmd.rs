use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{self, Context};
use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use squashview::squashfs::{path, DirEntry, FileType, Options, ReadAt, SquashFS};

#[derive(Parser, Debug)]
struct Cli {
    /// The SquashFS Filesystem to operate on
    filesystem: PathBuf,

    /// Byte offset of the filesystem within the file
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Number of decompressed blocks to keep cached
    #[arg(long, default_value_t = squashview::squashfs::DEFAULT_CACHE_CAPACITY)]
    cache_blocks: usize,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// The command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print file contents
    Cat(CatArgs),
    /// List files
    Ls(LsArgs),
    /// Show inode details
    Stat(PathArgs),
    /// Print symbolic link targets
    Readlink(PathArgs),
    /// Print extended attributes
    Xattr(PathArgs),
}

#[derive(Args, Debug)]
struct CatArgs {
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct LsArgs {
    #[arg(short)]
    long: bool,
    files: Vec<PathBuf>,
}

#[derive(Args, Debug)]
struct PathArgs {
    files: Vec<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = Options::new()
        .offset(cli.offset)
        .cache_capacity(cli.cache_blocks);
    let sqfs = SquashFS::open_with(&cli.filesystem, options)
        .context("Failed to open SquashFS")?;
    match &cli.command {
        Command::Cat(args) => cmd_cat(&sqfs, args),
        Command::Ls(args) => cmd_ls(&sqfs, args),
        Command::Stat(args) => cmd_stat(&sqfs, args),
        Command::Readlink(args) => cmd_readlink(&sqfs, args),
        Command::Xattr(args) => cmd_xattr(&sqfs, args),
    }
}

/// Look up `path`, following symbolic links
fn resolve<'a, R: ReadAt>(sqfs: &'a SquashFS<R>, file: &Path) -> anyhow::Result<DirEntry<'a, R>> {
    let canonical = path::canonicalize(sqfs, file, "/")
        .with_context(|| format!("cannot resolve '{}'", file.display()))?;
    Ok(sqfs.lookup(canonical)?)
}

fn cmd_cat<R: ReadAt>(sqfs: &SquashFS<R>, args: &CatArgs) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    for file_arg in &args.files {
        let entry = resolve(sqfs, file_arg)?;
        if entry.is_dir() {
            eprintln!("cat: {}: Is a directory", file_arg.display());
            continue;
        }
        let mut reader = entry.open()
            .with_context(|| format!("cannot open '{}'", file_arg.display()))?;
        io::copy(&mut reader, &mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

fn cmd_ls<R: ReadAt>(sqfs: &SquashFS<R>, args: &LsArgs) -> anyhow::Result<()> {
    let mut first = true;
    let paths = if args.files.is_empty() { vec![PathBuf::from("/")] } else { args.files.clone() };
    let single_path = paths.len() == 1;

    // First, print non-directories that directly appeared as arguments
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for file_arg in &paths {
        match sqfs.lookup(file_arg) {
            Ok(entry) if entry.is_dir() => dirs.push((file_arg, entry)),
            Ok(entry) => files.push((file_arg.display().to_string(), entry)),
            Err(e) => eprintln!("cannot access '{}': {}", file_arg.display(), e),
        }
    }
    if !files.is_empty() {
        display(files, args.long)?;
        first = false;
    }

    // Next, print the contents of each directory argument, preceded by "<NAME>:"
    // If only a single path argument is supplied, do not precede with the "<NAME>:" header
    for (file_arg, dir) in dirs {
        let files = dir.read_dir()?
            .map(|de| de.map(|de| (de.file_name(), de)))
            .collect::<Result<Vec<_>, _>>()?;
        if !first {
            println!();
        }
        if !single_path {
            println!("{}:", file_arg.display());
        }
        display(files, args.long)?;
        first = false;
    }
    Ok(())
}

fn display<R: ReadAt>(files: Vec<(String, DirEntry<'_, R>)>, long: bool) -> anyhow::Result<()> {
    if long {
        display_files_long(files)
    } else {
        display_files(files)
    }
}

fn display_files<R>(files: Vec<(String, DirEntry<'_, R>)>) -> anyhow::Result<()> {
    let lengths: Vec<usize> = files.iter().map(|(s, _)| s.len()).collect();
    let (Some(longest), Some(shortest)) = (lengths.iter().max(), lengths.iter().min()) else {
        return Ok(());
    };

    if !termion::is_tty(&io::stdout()) {
        for (filename, _) in files {
            println!("{}", filename);
        }
        return Ok(());
    }

    let (term_width, _) = termion::terminal_size()
        .context("Failed to read terminal size")?;
    let term_width = usize::from(term_width);

    // The correct number of columns is somewhere between width/max_col_length and
    // width/min_col_length
    let min_columns = (term_width / (longest + 2)).max(1);
    let max_columns = (term_width / (shortest + 2)).max(1);

    let mut columns = max_columns;
    let mut col_widths: Vec<usize> = Vec::new();
    let mut files_per_column = 0;
    while columns >= min_columns {
        files_per_column = lengths.len().div_ceil(columns);
        col_widths = (0..columns).map(|c|
            lengths.iter()
                .skip(files_per_column * c)
                .take(files_per_column)
                .map(|l| *l + 3)
                .max()
                .unwrap_or(0)
            ).collect();
        if col_widths.iter().sum::<usize>() <= term_width || columns == 1 {
            break;
        }
        columns -= 1;
    }

    for row in 0..files_per_column {
        for (n, (filename, _)) in files.iter().skip(row).step_by(files_per_column).enumerate() {
            if n != 0 {
                print!("   ");
            }
            let width = col_widths.get(n).map_or(0, |w| w.saturating_sub(3));
            print!("{:1$}", filename, width);
        }
        println!();
    }
    Ok(())
}

fn display_files_long<R: ReadAt>(files: Vec<(String, DirEntry<'_, R>)>) -> anyhow::Result<()> {
    for (filename, entry) in files {
        let link_postfix = match entry.read_link() {
            Ok(target) => format!(" -> {}", target.display()),
            Err(_) => String::new(),
        };
        let size = match entry.device_numbers() {
            Some((major, minor)) => format!("{major}, {minor}"),
            None => entry.len().to_string(),
        };
        println!(
            "{} {:>3} {:>5} {:>5} {:>10} {:>10} {}{}",
            mode_string(entry.mode()), entry.link_count(), entry.uid(), entry.gid(), size,
            entry.mtime(), filename, link_postfix,
        );
    }
    Ok(())
}

fn cmd_stat<R: ReadAt>(sqfs: &SquashFS<R>, args: &PathArgs) -> anyhow::Result<()> {
    for file_arg in &args.files {
        let entry = sqfs.lookup(file_arg)
            .with_context(|| format!("cannot stat '{}'", file_arg.display()))?;
        println!("  File: {}", file_arg.display());
        println!("  Size: {:<12} Type: {}", entry.len(), type_name(entry.file_type()));
        println!(" Inode: {:<12} Links: {}", entry.inode_number(), entry.link_count());
        println!("Access: ({:04o}/{})  Uid: {:<6} Gid: {}",
            entry.permissions(), mode_string(entry.mode()), entry.uid(), entry.gid());
        println!("Modify: {}", entry.mtime());
        if let Some((major, minor)) = entry.device_numbers() {
            println!("Device: {major},{minor}");
        }
        if let Ok(target) = entry.read_link() {
            println!("Target: {}", target.display());
        }
        println!(" Entry: {:?} ({:?})", entry.inode_ref(), entry.inode().inode_type());
    }
    Ok(())
}

fn cmd_readlink<R: ReadAt>(sqfs: &SquashFS<R>, args: &PathArgs) -> anyhow::Result<()> {
    for file_arg in &args.files {
        let target = sqfs.lookup(file_arg)?.read_link()
            .with_context(|| format!("cannot read link '{}'", file_arg.display()))?;
        println!("{}", target.display());
    }
    Ok(())
}

fn cmd_xattr<R: ReadAt>(sqfs: &SquashFS<R>, args: &PathArgs) -> anyhow::Result<()> {
    let single_path = args.files.len() == 1;
    for file_arg in &args.files {
        let entry = sqfs.lookup(file_arg)?;
        if !single_path {
            println!("{}:", file_arg.display());
        }
        for (key, value) in entry.xattrs() {
            println!("{key}=\"{value}\"");
        }
    }
    Ok(())
}

fn type_name(t: FileType) -> &'static str {
    match t {
        FileType::Directory => "directory",
        FileType::Regular => "regular file",
        FileType::Symlink => "symbolic link",
        FileType::BlockDevice => "block special file",
        FileType::CharDevice => "character special file",
        FileType::Fifo => "fifo",
        FileType::Socket => "socket",
        FileType::Irregular => "unknown",
    }
}

fn mode_string(mode: u32) -> String {
    let mut s = String::with_capacity(10);
    let ch = match (mode & 0o170000) >> 12 {
        1 => 'p',  // Pipe
        2 => 'c',  // char-dev
        4 => 'd',  // dir
        6 => 'b',  // block-dev
        8 => '-',  // file
        10 => 'l', // symlink
        12 => 's', // socket
        _ => '?',  // unknown
    };
    s.push(ch);

    for (shift, special, set_char) in [(6, 0o4000, 's'), (3, 0o2000, 's'), (0, 0o1000, 't')] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(match (bits & 0o1 != 0, mode & special != 0) {
            (true, true) => set_char,
            (false, true) => set_char.to_ascii_uppercase(),
            (true, false) => 'x',
            (false, false) => '-',
        });
    }
    s
}
