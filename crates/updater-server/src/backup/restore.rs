use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};
use zip::ZipArchive;

use updater_core::proto::BackupInfo;
use updater_core::{CoreError, Result};
use updater_utils::{copy_dir, ensure_dir, is_sub_path, now_millis, remove_path};

use super::BackupManager;
use super::ops::zip_error;
use crate::lock::acquire_dir_lock;

impl BackupManager {
    /// Extract into a staging sibling of the server directory, then swap it into place.
    /// The live tree is only touched once the backup has been fully unpacked.
    pub(crate) fn restore_blocking(&self, name: &str) -> Result<BackupInfo> {
        if is_sub_path(&self.server_path, &self.backup_path) {
            return Err(CoreError::InvalidConfig(format!(
                "backup directory {} lies inside the server directory and would be replaced by a restore",
                self.backup_path.display()
            )));
        }
        let backup = self.find_blocking(name)?;
        let _lock = acquire_dir_lock(&self.server_path)?;

        let (parent, dir_name) = split_server_path(&self.server_path);
        ensure_dir(&parent)?;
        let stamp = now_millis();
        let staging = StagingDir::new(parent.join(format!(".{dir_name}.restore-{stamp}")));
        let aside = parent.join(format!(".{dir_name}.previous-{stamp}"));

        info!(
            "restoring backup {} into {}",
            backup.name,
            self.server_path.display()
        );
        if backup.is_compressed {
            extract_zip(&backup, staging.path())?;
        } else {
            copy_dir(&backup.path, staging.path())?;
        }

        swap_into_place(&self.server_path, staging, &aside)?;
        info!("backup {} restored", backup.name);
        Ok(backup)
    }
}

fn split_server_path(server_path: &Path) -> (PathBuf, String) {
    let parent = match server_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let dir_name = server_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "server".to_string());
    (parent, dir_name)
}

fn swap_into_place(live: &Path, mut staged: StagingDir, aside: &Path) -> Result<()> {
    let had_live = live.exists();
    if had_live {
        fs::rename(live, aside).map_err(|err| CoreError::fs("move aside", live, err))?;
    }

    if let Err(err) = fs::rename(staged.path(), live) {
        if had_live {
            if let Err(rollback) = fs::rename(aside, live) {
                error!(
                    "could not put the previous server directory back ({rollback}); it is at {}",
                    aside.display()
                );
            }
        }
        staged.keep();
        error!("restored files left at {}", staged.path().display());
        return Err(CoreError::fs("move restored tree into", live, err));
    }
    staged.keep();

    if had_live {
        if let Err(err) = remove_path(aside) {
            warn!(
                "failed to remove previous server directory {}: {err}",
                aside.display()
            );
        }
    }
    Ok(())
}

fn extract_zip(backup: &BackupInfo, target: &Path) -> Result<()> {
    let file = File::open(&backup.path)
        .map_err(|err| CoreError::fs("open backup", &backup.path, err))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|err| {
        CoreError::invalid_backup(&backup.name, format!("cannot read archive: {err}"))
    })?;
    ensure_dir(target)?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| zip_error("read archive", &backup.path, err))?;
        let Some(rel) = entry.enclosed_name() else {
            return Err(CoreError::invalid_backup(
                &backup.name,
                format!("entry escapes the server directory: {}", entry.name()),
            ));
        };
        let out = target.join(rel);

        if entry.is_dir() {
            ensure_dir(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            ensure_dir(parent)?;
        }
        let mut output = File::create(&out).map_err(|err| CoreError::fs("create", &out, err))?;
        io::copy(&mut entry, &mut output).map_err(|err| CoreError::fs("extract", &out, err))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o777))
                .map_err(|err| CoreError::fs("set permissions", &out, err))?;
        }
    }
    Ok(())
}

/// Staging directory removed on drop unless kept.
struct StagingDir {
    path: PathBuf,
    keep: bool,
}

impl StagingDir {
    fn new(path: PathBuf) -> Self {
        Self { path, keep: false }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.keep || !self.path.exists() {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warn!("failed to remove staging directory {}: {err}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn swap_replaces_live_tree() {
        let tmp = TempDir::new().unwrap();
        let live = tmp.path().join("server");
        fs::create_dir_all(&live).unwrap();
        fs::write(live.join("old.txt"), "old").unwrap();

        let staged_path = tmp.path().join(".server.restore-1");
        fs::create_dir_all(&staged_path).unwrap();
        fs::write(staged_path.join("new.txt"), "new").unwrap();

        let aside = tmp.path().join(".server.previous-1");
        swap_into_place(&live, StagingDir::new(staged_path.clone()), &aside).unwrap();

        assert!(live.join("new.txt").exists());
        assert!(!live.join("old.txt").exists());
        assert!(!aside.exists());
        assert!(!staged_path.exists());
    }

    #[test]
    fn staging_dir_is_removed_unless_kept() {
        let tmp = TempDir::new().unwrap();
        let dropped = tmp.path().join("dropped");
        let kept = tmp.path().join("kept");
        fs::create_dir_all(&dropped).unwrap();
        fs::create_dir_all(&kept).unwrap();

        drop(StagingDir::new(dropped.clone()));
        let mut staging = StagingDir::new(kept.clone());
        staging.keep();
        drop(staging);

        assert!(!dropped.exists());
        assert!(kept.exists());
    }

    #[test]
    fn server_path_without_parent_uses_current_dir() {
        let (parent, name) = split_server_path(Path::new("server"));
        assert_eq!(parent, PathBuf::from("."));
        assert_eq!(name, "server");
    }
}
