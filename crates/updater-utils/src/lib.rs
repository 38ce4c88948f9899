//! Filesystem helpers shared by the supervisor and the backup engine.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use updater_core::{CoreError, Result};
use walkdir::WalkDir;

pub mod properties;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p).map_err(|err| CoreError::fs("create directory", p, err))
}

pub fn file_exists(p: &Path) -> bool {
    fs::metadata(p).map(|meta| meta.is_file()).unwrap_or(false)
}

pub fn dir_exists(p: &Path) -> bool {
    fs::metadata(p).map(|meta| meta.is_dir()).unwrap_or(false)
}

pub fn file_size(p: &Path) -> Result<u64> {
    let meta = fs::metadata(p).map_err(|err| CoreError::fs("stat", p, err))?;
    if meta.is_dir() {
        return Err(CoreError::fs(
            "size file",
            p,
            io::Error::new(io::ErrorKind::InvalidInput, "path is a directory"),
        ));
    }
    Ok(meta.len())
}

/// Total bytes of all regular files below `p`.
pub fn dir_size(p: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(p).follow_links(false) {
        let entry = entry.map_err(|err| walk_error(p, err))?;
        if entry.file_type().is_file() {
            let meta = entry
                .metadata()
                .map_err(|err| walk_error(entry.path(), err))?;
            total += meta.len();
        }
    }
    Ok(total)
}

/// Size of a file, or of a directory tree.
pub fn path_size(p: &Path) -> Result<u64> {
    if dir_exists(p) {
        dir_size(p)
    } else {
        file_size(p)
    }
}

pub fn copy_file(src: &Path, dst: &Path) -> Result<u64> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dst).map_err(|err| CoreError::fs("copy file", src, err))
}

pub fn copy_dir(src: &Path, dst: &Path) -> Result<CopyStats> {
    copy_dir_filtered(src, dst, |_, _| false)
}

/// Recursively copy `src` into `dst`. `skip(path, is_dir)` prunes entries; a skipped
/// directory is not descended into.
pub fn copy_dir_filtered<F>(src: &Path, dst: &Path, skip: F) -> Result<CopyStats>
where
    F: Fn(&Path, bool) -> bool,
{
    if !dir_exists(src) {
        return Err(CoreError::fs(
            "copy directory",
            src,
            io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
        ));
    }

    let mut stats = CopyStats::default();
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skip(entry.path(), entry.file_type().is_dir()));

    for entry in walker {
        let entry = entry.map_err(|err| walk_error(src, err))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| CoreError::Internal(format!("{} escaped copy root", entry.path().display())))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
            stats.dirs += 1;
        } else if file_type.is_file() || entry.path().is_file() {
            stats.bytes += copy_file(entry.path(), &target)?;
            stats.files += 1;
        } else {
            debug!("skipping special entry {}", entry.path().display());
        }
    }

    Ok(stats)
}

/// Remove a file or a whole directory tree.
pub fn remove_path(p: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(p).map_err(|err| CoreError::fs("stat", p, err))?;
    if meta.is_dir() {
        fs::remove_dir_all(p).map_err(|err| CoreError::fs("remove directory", p, err))
    } else {
        fs::remove_file(p).map_err(|err| CoreError::fs("remove file", p, err))
    }
}

/// Write `data` to a temporary file next to `path`, then rename it over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    ensure_dir(&parent)?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let tmp = parent.join(format!(".{file_name}.tmp-{}-{}", std::process::id(), now_nanos()));

    if let Err(err) = fs::write(&tmp, data) {
        let _ = fs::remove_file(&tmp);
        return Err(CoreError::fs("write temporary file", &tmp, err));
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(CoreError::fs("replace", path, err));
    }
    Ok(())
}

/// True if `child` is `parent` or lies below it. Both sides go through
/// [`resolve_path`], so existing and not-yet-created paths compare alike.
pub fn is_sub_path(parent: &Path, child: &Path) -> bool {
    resolve_path(child).starts_with(resolve_path(parent))
}

/// Absolute, lexically normalized form of `path`, with its deepest existing
/// ancestor canonicalized.
pub fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let mut normal = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other.as_os_str()),
        }
    }

    let mut existing = normal.as_path();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return tail
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => return normal,
        }
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

fn walk_error(root: &Path, err: walkdir::Error) -> CoreError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
    CoreError::fs("walk", path, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn copy_dir_reproduces_tree() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("a.txt"), "alpha");
        write(&src.join("nested/deeper/b.txt"), "beta");
        fs::create_dir_all(src.join("empty")).unwrap();

        let dst = tmp.path().join("dst");
        let stats = copy_dir(&src, &dst).unwrap();

        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 9);
        assert_eq!(fs::read_to_string(dst.join("nested/deeper/b.txt")).unwrap(), "beta");
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn copy_dir_filtered_prunes_directories() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        write(&src.join("keep.txt"), "k");
        write(&src.join("logs/latest.txt"), "l");

        let dst = tmp.path().join("dst");
        copy_dir_filtered(&src, &dst, |path, is_dir| {
            is_dir && path.file_name().is_some_and(|name| name == "logs")
        })
        .unwrap();

        assert!(dst.join("keep.txt").exists());
        assert!(!dst.join("logs").exists());
    }

    #[test]
    fn copy_dir_missing_source_is_filesystem_error() {
        let tmp = TempDir::new().unwrap();
        let err = copy_dir(&tmp.path().join("nope"), &tmp.path().join("dst")).unwrap_err();
        assert!(matches!(err, CoreError::Filesystem { .. }));
    }

    #[test]
    fn sizes_sum_regular_files() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("one"), "12345");
        write(&tmp.path().join("sub/two"), "123");
        assert_eq!(dir_size(tmp.path()).unwrap(), 8);
        assert_eq!(path_size(&tmp.path().join("one")).unwrap(), 5);
        assert!(file_size(tmp.path()).is_err());
    }

    #[test]
    fn atomic_write_replaces_contents_and_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("server.properties");
        atomic_write(&target, b"motd=one\n").unwrap();
        atomic_write(&target, b"motd=two\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "motd=two\n");
        let entries = fs::read_dir(tmp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn remove_path_handles_files_and_trees() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("tree/inner/file"), "x");
        write(&tmp.path().join("single"), "y");

        remove_path(&tmp.path().join("tree")).unwrap();
        remove_path(&tmp.path().join("single")).unwrap();
        assert!(!tmp.path().join("tree").exists());
        assert!(!tmp.path().join("single").exists());
    }

    #[test]
    fn sub_path_detection() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("server/backups");
        fs::create_dir_all(&inner).unwrap();
        assert!(is_sub_path(&tmp.path().join("server"), &inner));
        assert!(!is_sub_path(&inner, &tmp.path().join("server")));
    }

    #[test]
    fn sub_path_of_existing_dir_with_missing_child() {
        // Relative to the working directory, like a config's `./server`.
        let tmp = TempDir::new_in(".").unwrap();
        let server = tmp.path().join("server");
        fs::create_dir_all(&server).unwrap();

        assert!(server.is_relative());
        assert!(is_sub_path(&server, &server.join("backups")));
        assert!(is_sub_path(&server, &server.join("./world/../backups")));
        assert!(!is_sub_path(&server, &tmp.path().join("backups")));
        assert!(!is_sub_path(&server, &server.join("../backups")));
    }
}
