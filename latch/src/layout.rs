//! Storage directory layout and corrupt-file quarantine.
//!
//! One service instance owns one directory tree:
//!
//! ```text
//! <data_root>/
//! └── persistence/
//!     └── <service_id>/
//!         ├── storage.latch       <- the record table
//!         └── backup/             <- quarantined corrupt files
//! ```
//!
//! The tree is created once at activation, before the table opens. When an
//! existing table file fails validation it is moved into `backup/` under a
//! timestamped name rather than deleted, so a repair never destroys the only
//! copy of the data.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{LayoutError, Result};

/// Name of the record table file inside the service directory.
const TABLE_FILE_NAME: &str = "storage.latch";

/// Resolved paths for one service's storage tree.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    service_dir: PathBuf,
    backup_dir: PathBuf,
}

impl StorageLayout {
    /// Computes the layout for a service under `data_root`. No I/O happens
    /// until [`StorageLayout::ensure`].
    pub fn new<P: AsRef<Path>>(data_root: P, service_id: &str) -> Self {
        let service_dir = data_root.as_ref().join("persistence").join(service_id);
        let backup_dir = service_dir.join("backup");
        Self {
            service_dir,
            backup_dir,
        }
    }

    /// Creates the directory tree, including the backup directory.
    ///
    /// Idempotent: an existing tree is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::CreateFailed`] when a directory cannot be
    /// created — for example when part of the path is occupied by a file.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            LayoutError::CreateFailed {
                path: self.backup_dir.display().to_string(),
                source: e,
            }
            .into()
        })
    }

    /// Path of the record table file.
    pub fn table_file(&self) -> PathBuf {
        self.service_dir.join(TABLE_FILE_NAME)
    }

    /// Directory holding quarantined files.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Moves a corrupt file into the backup directory under a timestamped
    /// name and returns the destination.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::QuarantineFailed`] if the rename fails.
    pub fn quarantine(&self, file: &Path) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let file_name = file
            .file_name()
            .map_or_else(|| "unknown".into(), |n| n.to_string_lossy().into_owned());
        let target = self.backup_dir.join(format!("{file_name}.{stamp}"));

        fs::rename(file, &target).map_err(|e| LayoutError::QuarantineFailed {
            path: file.display().to_string(),
            source: e,
        })?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_creates_tree() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp_dir.path(), "latch");

        layout.ensure().unwrap();

        assert!(temp_dir.path().join("persistence/latch").is_dir());
        assert!(temp_dir.path().join("persistence/latch/backup").is_dir());
        assert_eq!(
            layout.table_file(),
            temp_dir.path().join("persistence/latch/storage.latch")
        );

        // Idempotent.
        layout.ensure().unwrap();
    }

    #[test]
    fn test_ensure_fails_when_path_is_a_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("persistence"), b"in the way").unwrap();

        let layout = StorageLayout::new(temp_dir.path(), "latch");
        assert!(layout.ensure().is_err());
    }

    #[test]
    fn test_quarantine_moves_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp_dir.path(), "latch");
        layout.ensure().unwrap();

        let table = layout.table_file();
        fs::write(&table, b"corrupt bytes").unwrap();

        let target = layout.quarantine(&table).unwrap();

        assert!(!table.exists());
        assert!(target.exists());
        assert!(target.starts_with(layout.backup_dir()));
        assert_eq!(fs::read(&target).unwrap(), b"corrupt bytes");
    }
}
