//! Atomic, change-aware file operations.
//!
//! Files are written to a sibling temp file, given their final mode, synced
//! and renamed over the target, so systemd and annil-server never observe a
//! half-written file. Identical contents are left untouched.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use super::InstallerError;

/// What a sync did to one file on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Unchanged,
    Created,
    Updated,
    Removed,
    Absent,
}

impl FileChange {
    pub fn is_change(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Removed)
    }
}

/// Write `content` to `path` via a sibling temp file given `mode` first.
/// The temp file is removed again if any step fails.
pub(super) fn write_file_atomic(path: &Path, content: &str, mode: u32) -> Result<(), InstallerError> {
    let temp_path = path.with_extension("tmp");

    let written = fill_temp(&temp_path, content, mode).and_then(|()| {
        fs::rename(&temp_path, path).map_err(|e| {
            InstallerError::System(format!(
                "Failed to move {} into place: {}",
                path.display(),
                e
            ))
        })
    });

    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

fn fill_temp(temp_path: &Path, content: &str, mode: u32) -> Result<(), InstallerError> {
    let mut file = fs::File::create(temp_path).map_err(|e| {
        InstallerError::System(format!("Failed to create {}: {}", temp_path.display(), e))
    })?;
    file.write_all(content.as_bytes()).map_err(|e| {
        InstallerError::System(format!("Failed to write {}: {}", temp_path.display(), e))
    })?;
    set_mode(temp_path, mode)?;
    file.sync_all().map_err(|e| {
        InstallerError::System(format!("Failed to sync {}: {}", temp_path.display(), e))
    })
}

/// Bring `path` to exactly `content`, creating parent directories as needed.
pub(super) fn sync_file(path: &Path, content: &str, mode: u32) -> Result<FileChange, InstallerError> {
    let existing = match fs::read_to_string(path) {
        Ok(existing) => Some(existing),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            return Err(InstallerError::System(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };

    if existing.as_deref() == Some(content) {
        return Ok(FileChange::Unchanged);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            InstallerError::System(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    write_file_atomic(path, content, mode)?;

    Ok(if existing.is_some() {
        FileChange::Updated
    } else {
        FileChange::Created
    })
}

pub(super) fn remove_file_if_exists(path: &Path) -> Result<FileChange, InstallerError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(FileChange::Removed),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileChange::Absent),
        Err(e) => Err(InstallerError::System(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

fn set_mode(path: &Path, mode: u32) -> Result<(), InstallerError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            InstallerError::System(format!("Failed to set permissions on {}: {}", path.display(), e))
        })?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);

    Ok(())
}
