//! Timestamped backup copies of primary saves.
//!
//! Backups of `slot.save` are named `slot_backup_<YYYYmmdd_HHMMSS_mmm>.save`
//! and sort chronologically by name. Damaged primaries are set aside as
//! `slot_corrupted_<timestamp>.save` before a backup replaces them.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};

use super::atomic::{copy_atomic, is_temp_name};
use crate::error::{PersistenceError, Result};
use crate::path::SAVE_EXTENSION;

const BACKUP_INFIX: &str = "_backup_";
const CORRUPTED_INFIX: &str = "_corrupted_";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Filename without the `.save` extension.
pub fn save_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(&format!(".{SAVE_EXTENSION}"))
        .map(str::to_string)
        .unwrap_or(name)
}

/// Stem before `infix` when `name` is exactly `<stem><infix><timestamp>[_n].save`.
fn generated_stem<'a>(name: &'a str, infix: &str) -> Option<&'a str> {
    let body = name.strip_suffix(&format!(".{SAVE_EXTENSION}"))?;
    let at = body.rfind(infix)?;
    let (stem, rest) = (&body[..at], &body[at + infix.len()..]);
    if stem.is_empty() {
        return None;
    }
    // YYYYmmdd_HHMMSS_mmm, then an optional _n collision counter
    let (stamp, counter) = rest.split_at_checked(19)?;
    let counter_ok = counter.is_empty()
        || counter
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
    let raw = stamp.as_bytes();
    let millis_ok = raw[15] == b'_' && raw[16..].iter().all(u8::is_ascii_digit);
    let when_ok = stamp
        .get(..15)
        .is_some_and(|when| NaiveDateTime::parse_from_str(when, "%Y%m%d_%H%M%S").is_ok());
    (counter_ok && millis_ok && when_ok).then_some(stem)
}

pub fn is_backup_name(name: &str) -> bool {
    generated_stem(name, BACKUP_INFIX).is_some()
}

pub fn is_corrupted_name(name: &str) -> bool {
    generated_stem(name, CORRUPTED_INFIX).is_some()
}

/// Whether `name` has the shape of a file this module or the atomic writer
/// creates, so it cannot be used as a primary save.
pub fn is_generated_name(name: &str) -> bool {
    is_backup_name(name) || is_corrupted_name(name) || is_temp_name(name)
}

/// A `.save` file that is neither a backup, a set-aside copy, nor a temp file.
pub fn is_primary_save_name(name: &str) -> bool {
    name.ends_with(&format!(".{SAVE_EXTENSION}")) && !is_generated_name(name)
}

/// Stem of the primary a backup belongs to.
pub fn primary_stem_of_backup(name: &str) -> Option<&str> {
    generated_stem(name, BACKUP_INFIX)
}

fn timestamped_path(primary: &Path, infix: &str) -> PathBuf {
    let stem = save_stem(primary);
    let stamp = Utc::now().format(TIMESTAMP_FORMAT);
    let mut candidate = primary.with_file_name(format!("{stem}{infix}{stamp}.{SAVE_EXTENSION}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = primary.with_file_name(format!("{stem}{infix}{stamp}_{n}.{SAVE_EXTENSION}"));
        n += 1;
    }
    candidate
}

/// Fresh backup path for `primary`.
pub fn backup_path_for(primary: &Path) -> PathBuf {
    timestamped_path(primary, BACKUP_INFIX)
}

/// Fresh path for setting aside a damaged `primary`.
pub fn corrupted_path_for(primary: &Path) -> PathBuf {
    timestamped_path(primary, CORRUPTED_INFIX)
}

/// Copy `primary` to a new backup and return the backup path.
pub fn create_backup(primary: &Path) -> Result<PathBuf> {
    if !primary.exists() {
        return Err(PersistenceError::FileNotFound {
            path: primary.to_path_buf(),
        });
    }
    let backup = backup_path_for(primary);
    copy_atomic(primary, &backup)?;
    tracing::debug!(primary = %primary.display(), backup = %backup.display(), "created backup");
    Ok(backup)
}

/// Backups of `primary`, newest first.
pub fn list_backups(primary: &Path) -> Result<Vec<PathBuf>> {
    let Some(dir) = primary.parent() else {
        return Ok(Vec::new());
    };
    let stem = save_stem(primary);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PersistenceError::io("list", dir, e)),
    };

    let mut backups: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            !is_temp_name(&name)
                && name.ends_with(&format!(".{SAVE_EXTENSION}"))
                && primary_stem_of_backup(&name) == Some(stem.as_str())
        })
        .map(|entry| entry.path())
        .collect();
    backups.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(backups)
}

/// Delete the oldest backups of `primary` beyond `keep`. Returns how many were removed.
pub fn rotate_backups(primary: &Path, keep: usize) -> Result<usize> {
    let backups = list_backups(primary)?;
    let mut removed = 0;
    for stale in backups.iter().skip(keep) {
        match fs::remove_file(stale) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PersistenceError::io("remove", stale, e)),
        }
    }
    if removed > 0 {
        tracing::debug!(primary = %primary.display(), removed, keep, "rotated backups");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_backup_naming() {
        let path = backup_path_for(Path::new("/saves/slot1.save"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("slot1_backup_"));
        assert!(name.ends_with(".save"));
        assert_eq!(primary_stem_of_backup(&name), Some("slot1"));
        assert!(!is_primary_save_name(&name));
        assert!(is_primary_save_name("slot1.save"));
    }

    #[test]
    fn test_only_timestamped_names_are_backups() {
        assert_eq!(
            primary_stem_of_backup("slot_backup_20260103_101500_042.save"),
            Some("slot")
        );
        assert_eq!(
            primary_stem_of_backup("slot_backup_20260103_101500_042_2.save"),
            Some("slot")
        );
        assert_eq!(
            primary_stem_of_backup("my_backup_old_backup_20260103_101500_042.save"),
            Some("my_backup_old")
        );
        for name in [
            "slot_backup_1.save",
            "slot_backup_plan.save",
            "slot_backup_20261399_101500_042.save",
            "slot_backup_20260103_101500_042_.save",
            "slot_backup_20260103_101500_042.sav",
            "_backup_20260103_101500_042.save",
        ] {
            assert_eq!(primary_stem_of_backup(name), None, "{name}");
            assert!(!is_backup_name(name), "{name}");
        }
        assert!(is_primary_save_name("slot_backup_1.save"));
        assert!(is_primary_save_name("before_corrupted_by_dragons.save"));
        assert!(!is_primary_save_name("slot_corrupted_20260103_101500_042.save"));
    }

    #[test]
    fn test_user_save_named_like_a_backup_survives_rotation() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("slot.save");
        fs::write(&primary, b"v").unwrap();
        fs::write(dir.path().join("slot_backup_1.save"), b"mine").unwrap();
        fs::write(dir.path().join("slot_backup_20260101_000000_000.save"), b"b").unwrap();

        assert_eq!(list_backups(&primary).unwrap().len(), 1);
        assert_eq!(rotate_backups(&primary, 0).unwrap(), 1);
        assert!(dir.path().join("slot_backup_1.save").exists());
    }

    #[test]
    fn test_backups_listed_newest_first_and_rotated() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("slot.save");
        fs::write(&primary, b"v").unwrap();
        for stamp in ["20260101_000000_000", "20260102_000000_000", "20260103_000000_000"] {
            fs::write(dir.path().join(format!("slot_backup_{stamp}.save")), b"b").unwrap();
        }
        // a different primary with a shared prefix
        fs::write(dir.path().join("slot2_backup_20260104_000000_000.save"), b"b").unwrap();

        let backups = list_backups(&primary).unwrap();
        assert_eq!(backups.len(), 3);
        assert!(backups[0].ends_with("slot_backup_20260103_000000_000.save"));

        assert_eq!(rotate_backups(&primary, 1).unwrap(), 2);
        assert_eq!(list_backups(&primary).unwrap().len(), 1);
        assert_eq!(rotate_backups(&primary, 1).unwrap(), 0);
    }

    #[test]
    fn test_create_backup_copies_bytes() {
        let dir = tempdir().unwrap();
        let primary = dir.path().join("slot.save");
        fs::write(&primary, b"payload").unwrap();
        let first = create_backup(&primary).unwrap();
        let second = create_backup(&primary).unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read(&first).unwrap(), b"payload");
        assert_eq!(list_backups(&primary).unwrap().len(), 2);
    }

    #[test]
    fn test_create_backup_of_missing_primary() {
        let dir = tempdir().unwrap();
        let err = create_backup(&dir.path().join("nope.save")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::FileNotFound);
    }
}
