// Note, quotes in this code are taken from the Open Group Base Specifications,
// Section 4.11 Pathname Resolution, found here:
// https://pubs.opengroup.org/onlinepubs/009696699/basedefs/xbd_chap04.html

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::direntry::{os_str_from_bytes, DirEntry};
use super::error::{Error, Result};
use super::readermux::ReadAt;
use super::squashfs::SquashFS;

/// Number of symbolic links followed before resolution gives up (Linux MAXSYMLINKS)
pub const MAX_SYMLINKS: usize = 40;

enum Step {
    Parent,
    Name(OsString),
}

fn steps(path: &Path) -> Result<VecDeque<Step>> {
    let mut steps = VecDeque::new();
    for comp in path.components() {
        match comp {
            Component::RootDir | Component::CurDir => {},
            Component::ParentDir => steps.push_back(Step::Parent),
            Component::Normal(n) => steps.push_back(Step::Name(n.to_os_string())),
            Component::Prefix(_) => return Err(Error::NotFound(path.display().to_string())),
        }
    }
    Ok(steps)
}

/// Resolve `path` within the filesystem to an absolute path free of `.`, `..` and symbolic links.
/// Relative paths are resolved against `cwd`, itself taken relative to the root.
pub fn canonicalize<R, P, Q>(sqfs: &SquashFS<R>, path: P, cwd: Q) -> Result<PathBuf>
where P: AsRef<Path>,
      Q: AsRef<Path>,
      R: ReadAt,
{
    let path = path.as_ref();
    // "A null pathname shall not be successfully resolved"
    if path.as_os_str().is_empty() {
        return Err(Error::NotFound("empty path".into()));
    }

    // "If the pathname does not begin with a '/', the predecessor of the first filename of the pathname shall
    //  [be] the current working directory of the process..."
    let target_path = if path.has_root() {
        path.to_path_buf()
    } else {
        Path::new("/").join(cwd.as_ref()).join(path)
    };

    // "A pathname the contains at least one non-'/' character and that ends with one or more trailing '/'
    // characters shall not be resolved successfully unless the last pathname component before the trailing '/'
    // characters names an existing directory..."
    let trailing_slash = path.as_os_str().as_encoded_bytes().ends_with(b"/");

    let resolved = resolve(sqfs, &target_path)?;
    if trailing_slash && resolved.last().is_some_and(|de| !de.is_dir()) {
        return Err(Error::NotADirectory);
    }

    let mut out = PathBuf::from("/");
    for de in &resolved {
        out.push(os_str_from_bytes(de.name_bytes()));
    }
    Ok(out)
}

fn resolve<'a, R: ReadAt>(sqfs: &'a SquashFS<R>, path: &Path) -> Result<Vec<DirEntry<'a, R>>> {
    // So that we can navigate to a parent component without having to re-resolve the entire path, as each component
    // is resolved, add it to a vector of components with their corresponding Inodes.
    let mut resolved: Vec<DirEntry<'a, R>> = Vec::new();
    let mut pending = steps(path)?;
    let mut links_followed = 0;

    while let Some(step) = pending.pop_front() {
        let name = match step {
            Step::Parent => {
                // "as a special case, in the root directory, dot-dot may refer to the root directory itself."
                resolved.pop();
                continue;
            },
            Step::Name(name) => name,
        };

        let dir = resolved.last().map_or(&**sqfs.root_inode(), |de| de.inode());
        let dirent = sqfs.lookup_child(dir, name.as_encoded_bytes())?;
        if !dirent.is_symlink() {
            resolved.push(dirent);
            continue;
        }
        let target = dirent.inode().symlink_target().unwrap_or_default();

        // If this dirent is a symbolic link then substitute its contents:
        //   - Empty, return error
        //   - relative path, insert the contents at the current position
        //   - absolute path, restart resolution with the symbolic link contents as the first component
        links_followed += 1;
        if links_followed > MAX_SYMLINKS {
            return Err(Error::TooManyLinks);
        }
        if target.is_empty() {
            return Err(Error::NotFound(format!("empty symlink {}", dirent.file_name())));
        }
        let target = PathBuf::from(os_str_from_bytes(target).into_owned());
        if target.has_root() {
            resolved.clear();
        }
        let mut next = steps(&target)?;
        next.append(&mut pending);
        pending = next;
    }
    Ok(resolved)
}
