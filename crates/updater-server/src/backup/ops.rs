use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use updater_core::proto::{BackupInfo, BackupKind};
use updater_core::{CoreError, Result};
use updater_utils::properties::PROPERTIES_FILE;
use updater_utils::{copy_dir_filtered, dir_exists, dir_size, ensure_dir, path_size, remove_path};

use super::{BackupManager, SKIPPED_DIRS, logical_name, validate_name};
use crate::lock::acquire_dir_lock;

/// Entries left out of every backup: lock files, logs, temp files and the
/// [`SKIPPED_DIRS`] directories.
pub fn should_skip(path: &Path, is_dir: bool) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
        return false;
    };
    if is_dir && SKIPPED_DIRS.contains(&&*name) {
        return true;
    }
    name.ends_with(".lock")
        || name.ends_with(".log")
        || name.ends_with(".log.gz")
        || name.starts_with("tmp_")
        || name.starts_with("temp_")
}

impl BackupManager {
    pub(crate) fn create_blocking(&self, name: &str) -> Result<BackupInfo> {
        if !dir_exists(&self.server_path) {
            return Err(CoreError::MissingDirectory(self.server_path.clone()));
        }
        ensure_dir(&self.backup_path)?;
        let _lock = acquire_dir_lock(&self.server_path)?;

        if self.entry_path(name).is_some() {
            return Err(CoreError::BackupExists(name.to_string()));
        }

        let file_name = if self.compression {
            format!("{name}.zip")
        } else {
            name.to_string()
        };
        let final_path = self.backup_path.join(&file_name);
        let partial = self.backup_path.join(format!(".{file_name}.partial"));
        if partial.exists() {
            debug!("removing stale partial backup {}", partial.display());
            remove_path(&partial)?;
        }

        let source = fs::canonicalize(&self.server_path)
            .map_err(|err| CoreError::fs("resolve", &self.server_path, err))?;
        // A backup directory nested inside the server tree must not copy itself.
        let nested_backups = fs::canonicalize(&self.backup_path)
            .ok()
            .filter(|backups| backups.starts_with(&source));
        let skip = |path: &Path, is_dir: bool| {
            should_skip(path, is_dir)
                || nested_backups.as_deref().is_some_and(|backups| path.starts_with(backups))
        };

        info!(
            "creating backup {name} from {} ({})",
            self.server_path.display(),
            if self.compression { "zip" } else { "copy" }
        );
        let written = if self.compression {
            write_zip(&source, &partial, skip)
        } else {
            copy_dir_filtered(&source, &partial, skip).map(|stats| stats.files)
        };
        let files = match written {
            Ok(files) => files,
            Err(err) => {
                if partial.exists() {
                    if let Err(cleanup) = remove_path(&partial) {
                        warn!("failed to remove partial backup {}: {cleanup}", partial.display());
                    }
                }
                return Err(err);
            }
        };

        if let Err(err) = fs::rename(&partial, &final_path) {
            let _ = remove_path(&partial);
            return Err(CoreError::fs("finalize backup", &final_path, err));
        }

        let size_bytes = path_size(&final_path)?;
        info!("backup {name} created: {files} files, {size_bytes} bytes");
        Ok(BackupInfo {
            name: name.to_string(),
            path: final_path,
            size_bytes,
            created_at: Utc::now(),
            is_compressed: self.compression,
            kind: BackupKind::from_backup_name(name),
        })
    }

    pub(crate) fn list_blocking(&self) -> Result<Vec<BackupInfo>> {
        if !dir_exists(&self.backup_path) {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.backup_path)
            .map_err(|err| CoreError::fs("read backup directory", &self.backup_path, err))?;

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|err| CoreError::fs("read backup directory", &self.backup_path, err))?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            match describe(&path, &file_name) {
                Ok(Some(info)) => backups.push(info),
                Ok(None) => {}
                Err(err) => warn!("skipping unreadable backup entry {}: {err}", path.display()),
            }
        }

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(backups)
    }

    pub(crate) fn find_blocking(&self, name: &str) -> Result<BackupInfo> {
        let wanted = logical_name(name);
        self.list_blocking()?
            .into_iter()
            .find(|info| info.name == wanted)
            .ok_or_else(|| CoreError::BackupNotFound(wanted.to_string()))
    }

    pub(crate) fn delete_blocking(&self, name: &str) -> Result<()> {
        let wanted = logical_name(name);
        validate_name(wanted)?;
        let _lock = acquire_dir_lock(&self.server_path)?;
        let path = self
            .entry_path(wanted)
            .ok_or_else(|| CoreError::BackupNotFound(wanted.to_string()))?;
        remove_path(&path)?;
        info!("deleted backup {wanted}");
        Ok(())
    }

    pub(crate) fn cleanup_blocking(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let Some(cutoff) = self.retention.cutoff(now) else {
            debug!("backup retention disabled; nothing to clean up");
            return Ok(Vec::new());
        };
        let _lock = acquire_dir_lock(&self.server_path)?;

        let mut deleted = Vec::new();
        for backup in self.list_blocking()? {
            if backup.created_at < cutoff {
                remove_path(&backup.path)?;
                info!("removed expired backup {} (created {})", backup.name, backup.created_at);
                deleted.push(backup.name);
            }
        }
        if !deleted.is_empty() {
            info!(
                "retention cleanup removed {} backups older than {} days",
                deleted.len(),
                self.retention.days
            );
        }
        Ok(deleted)
    }

    pub(crate) fn validate_blocking(&self, name: &str) -> Result<()> {
        let backup = self.find_blocking(name)?;
        if !backup.is_compressed {
            if !dir_exists(&backup.path) {
                return Err(CoreError::invalid_backup(&backup.name, "not a directory"));
            }
            return Ok(());
        }

        let file = File::open(&backup.path)
            .map_err(|err| CoreError::fs("open backup", &backup.path, err))?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|err| {
            CoreError::invalid_backup(&backup.name, format!("cannot read archive: {err}"))
        })?;
        let has_properties = archive.file_names().any(|entry| {
            !entry.ends_with('/')
                && Path::new(entry)
                    .file_name()
                    .is_some_and(|file| file == PROPERTIES_FILE)
        });
        if !has_properties {
            return Err(CoreError::invalid_backup(
                &backup.name,
                format!("archive does not contain {PROPERTIES_FILE}"),
            ));
        }
        debug!("backup {} validated", backup.name);
        Ok(())
    }

    pub(crate) fn space_blocking(&self) -> Result<u64> {
        if !dir_exists(&self.backup_path) {
            return Ok(0);
        }
        dir_size(&self.backup_path)
    }

    /// On-disk location of an existing backup in either form.
    pub(crate) fn entry_path(&self, name: &str) -> Option<PathBuf> {
        let archive = self.backup_path.join(format!("{name}.zip"));
        if archive.is_file() {
            return Some(archive);
        }
        let plain = self.backup_path.join(name);
        plain.is_dir().then_some(plain)
    }
}

fn describe(path: &Path, file_name: &str) -> Result<Option<BackupInfo>> {
    let meta = fs::metadata(path).map_err(|err| CoreError::fs("stat", path, err))?;
    let (name, is_compressed) = if meta.is_dir() {
        (file_name.to_string(), false)
    } else if let Some(stem) = file_name.strip_suffix(".zip").filter(|_| meta.is_file()) {
        (stem.to_string(), true)
    } else {
        return Ok(None);
    };

    let created_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|err| CoreError::fs("read modification time", path, err))?;
    let size_bytes = if is_compressed { meta.len() } else { dir_size(path)? };

    Ok(Some(BackupInfo {
        kind: BackupKind::from_backup_name(&name),
        name,
        path: path.to_path_buf(),
        size_bytes,
        created_at,
        is_compressed,
    }))
}

/// Archive `src` into a new zip at `dest`, Deflate-compressed, with forward-slash entry
/// names relative to `src`. Returns the number of files written.
fn write_zip<F>(src: &Path, dest: &Path, skip: F) -> Result<u64>
where
    F: Fn(&Path, bool) -> bool,
{
    let file = File::create(dest).map_err(|err| CoreError::fs("create archive", dest, err))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut files = 0u64;
    let walker = WalkDir::new(src)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !skip(entry.path(), entry.file_type().is_dir()));

    for entry in walker {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(src).to_path_buf();
            let source = err
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop detected"));
            CoreError::fs("walk", path, source)
        })?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|_| CoreError::Internal(format!("{} escaped backup root", entry.path().display())))?;
        let archive_name = archive_name(rel);
        let meta = entry
            .metadata()
            .map_err(|err| CoreError::fs("stat", entry.path(), io::Error::other(err)))?;

        if meta.is_dir() {
            zip.add_directory(
                format!("{archive_name}/"),
                with_mode(dir_options, &meta),
            )
            .map_err(|err| zip_error("write archive", dest, err))?;
        } else if meta.is_file() {
            zip.start_file(archive_name, with_mode(file_options, &meta))
                .map_err(|err| zip_error("write archive", dest, err))?;
            let mut input = File::open(entry.path())
                .map_err(|err| CoreError::fs("open", entry.path(), err))?;
            io::copy(&mut input, &mut zip).map_err(|err| CoreError::fs("archive", entry.path(), err))?;
            files += 1;
        } else {
            debug!("skipping special entry {}", entry.path().display());
        }
    }

    let mut writer = zip
        .finish()
        .map_err(|err| zip_error("finish archive", dest, err))?;
    writer
        .flush()
        .map_err(|err| CoreError::fs("flush archive", dest, err))?;
    Ok(files)
}

fn archive_name(rel: &Path) -> String {
    rel.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn with_mode(options: SimpleFileOptions, meta: &fs::Metadata) -> SimpleFileOptions {
    use std::os::unix::fs::PermissionsExt;
    options.unix_permissions(meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn with_mode(options: SimpleFileOptions, _meta: &fs::Metadata) -> SimpleFileOptions {
    options
}

pub(crate) fn zip_error(op: &'static str, path: &Path, err: ZipError) -> CoreError {
    match err {
        ZipError::Io(source) => CoreError::fs(op, path, source),
        other => CoreError::fs(op, path, io::Error::other(other.to_string())),
    }
}
