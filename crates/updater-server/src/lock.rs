use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use updater_core::{CoreError, Result};
use updater_utils::ensure_dir;

/// Exclusive advisory lock on a server directory. Released when dropped.
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lock file for `server_dir`: a hidden sibling, so it survives the directory being swapped.
pub fn lock_path_for(server_dir: &Path) -> PathBuf {
    let name = server_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "server".to_string());
    match server_dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(format!(".{name}.lock")),
        _ => PathBuf::from(format!(".{name}.lock")),
    }
}

/// Block until the directory lock is held.
pub fn acquire_dir_lock(server_dir: &Path) -> Result<DirLock> {
    let (file, path) = open_lock_file(server_dir)?;
    FileExt::lock_exclusive(&file).map_err(|err| CoreError::fs("lock", &path, err))?;
    Ok(DirLock { _file: file, path })
}

/// Take the directory lock without waiting. `Ok(None)` if another holder has it.
pub fn try_acquire_dir_lock(server_dir: &Path) -> Result<Option<DirLock>> {
    let (file, path) = open_lock_file(server_dir)?;
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => Ok(Some(DirLock { _file: file, path })),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
        Err(err) => Err(CoreError::fs("lock", &path, err)),
    }
}

fn open_lock_file(server_dir: &Path) -> Result<(File, PathBuf)> {
    let path = lock_path_for(server_dir);
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|err| CoreError::fs("open lock file", &path, err))?;
    Ok((file, path))
}
