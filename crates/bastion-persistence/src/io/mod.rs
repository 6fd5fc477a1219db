//! File I/O for save files.
//!
//! This module handles:
//! - Atomic replacement through synced temp files
//! - Timestamped backups and their rotation

mod atomic;
mod backup;

pub use atomic::{
    INCOMPLETE_SUFFIXES, StagedFile, TEMP_MARKER, copy_atomic, is_temp_name, read_file,
    temp_path_for, write_atomic, write_direct,
};
pub use backup::{
    backup_path_for, corrupted_path_for, create_backup, is_backup_name, is_corrupted_name,
    is_generated_name, is_primary_save_name, list_backups, primary_stem_of_backup, rotate_backups,
    save_stem,
};
