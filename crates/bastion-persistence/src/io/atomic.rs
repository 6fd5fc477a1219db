//! Crash-safe file replacement.
//!
//! The full buffer goes to a temp file in the target's directory, is synced,
//! and is then renamed over the target. Until the rename the original file is
//! never opened for writing.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{PersistenceError, Result};

/// Marker embedded in temp file names; recovery treats these as leftovers.
pub const TEMP_MARKER: &str = ".tmp.";

/// Suffixes left behind by interrupted writers.
pub const INCOMPLETE_SUFFIXES: [&str; 3] = [".tmp", ".partial", ".writing"];

/// True for names produced by an atomic write that never completed.
pub fn is_temp_name(name: &str) -> bool {
    name.contains(TEMP_MARKER) || INCOMPLETE_SUFFIXES.iter().any(|s| name.ends_with(s))
}

/// Temp path next to `target`.
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}{TEMP_MARKER}{}", Uuid::new_v4().simple()))
}

/// A synced temp file that is removed on drop unless committed.
#[derive(Debug)]
pub struct StagedFile {
    temp_path: PathBuf,
    target_path: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Write `bytes` to a fresh temp file beside `target` and sync it.
    pub fn stage(target: &Path, bytes: &[u8]) -> Result<Self> {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::io("create directory", parent, e))?;
        }

        let staged = Self {
            temp_path: temp_path_for(target),
            target_path: target.to_path_buf(),
            committed: false,
        };
        write_synced(&staged.temp_path, bytes)?;
        tracing::debug!(temp = %staged.temp_path.display(), bytes = bytes.len(), "staged temp file");
        Ok(staged)
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Rename over the target and sync the directory entry.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.target_path).map_err(|source| {
            PersistenceError::AtomicWriteFailed {
                temp_path: self.temp_path.clone(),
                target_path: self.target_path.clone(),
                source,
            }
        })?;
        self.committed = true;
        if let Some(parent) = self.target_path.parent() {
            fsync_directory(parent);
        }
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.temp_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(temp = %self.temp_path.display(), error = %e, "failed to remove temp file");
        }
    }
}

/// Replace `target` with `bytes` through a staged temp file.
///
/// `before_rename` runs after the temp file is durable and before the
/// rename; an error from it abandons the write and leaves `target` as it was.
pub fn write_atomic<F>(target: &Path, bytes: &[u8], before_rename: F) -> Result<()>
where
    F: FnOnce(&StagedFile) -> Result<()>,
{
    let staged = StagedFile::stage(target, bytes)?;
    before_rename(&staged)?;
    staged.commit()
}

/// Overwrite `path` in place. Used when atomic writes are turned off.
pub fn write_direct(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io("create directory", parent, e))?;
    }
    write_synced(path, bytes)
}

/// Read a whole file, mapping errors onto persistence kinds.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| PersistenceError::io("read", path, e))
}

/// Copy `source` to `dest` atomically.
pub fn copy_atomic(source: &Path, dest: &Path) -> Result<()> {
    let bytes = read_file(source)?;
    write_atomic(dest, &bytes, |_| Ok(()))
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let file = File::create(path).map_err(|e| PersistenceError::io("create", path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .and_then(|()| writer.flush())
        .map_err(|e| PersistenceError::io("write", path, e))?;
    let file = writer
        .into_inner()
        .map_err(|e| PersistenceError::io("write", path, e.into_error()))?;
    file.sync_all()
        .map_err(|e| PersistenceError::io("sync", path, e))
}

/// Best effort; not every platform can open a directory for syncing.
fn fsync_directory(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(handle) = File::open(dir)
            && let Err(e) = handle.sync_all()
        {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to sync directory");
        }
    }
    #[cfg(not(unix))]
    let _ = dir;
}
