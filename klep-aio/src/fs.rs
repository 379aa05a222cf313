/*
File: klep-aio/src/fs.rs
Purpose: Filesystem primitives for the project documents.
*/
use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::Arc,
};

use klep_common::error::{KlepError, Result};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        KlepError::from(e)
    })
}

/// Reads a file to a string, `None` when it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("{} does not exist", path.display());
            Ok(None)
        }
        Err(e) => {
            error!("Failed read file {}: {}", path.display(), e);
            Err(KlepError::from(e))
        }
    }
}

/// Atomically replaces `original_path` with `content` by writing a sibling
/// temporary file and renaming it over the original. Readers never observe
/// a partially written document.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        KlepError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    create_dir_all(dir)?;

    let original_perms = fs::metadata(original_path).map(|m| m.permissions()).ok();

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let temp_path = temp_file.path().to_path_buf();
    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_path.display()
    );

    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            original_path.display(),
            e.error
        );
        KlepError::Io(Arc::new(e.error))
    })?;

    // NamedTempFile creates 0600 files; keep the previous mode or fall back to 0644.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = original_perms.unwrap_or_else(|| fs::Permissions::from_mode(0o644));
        if let Err(e) = fs::set_permissions(original_path, perms) {
            warn!(
                "Failed to set permissions on {}: {}",
                original_path.display(),
                e
            );
        }
    }
    #[cfg(not(unix))]
    let _ = original_perms;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_content_and_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("klep.lock");
        atomic_write_file(&path, b"first").unwrap();
        atomic_write_file(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn missing_files_read_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_optional(&dir.path().join("absent.json")).unwrap().is_none());
    }
}
