//! Atomic file operations for cache persistence.
//!
//! Writes go through a temp file next to the target:
//! 1. Write to a temp file with a unique PID+TID suffix
//! 2. fsync so the data reaches disk
//! 3. Rename over the target
//!
//! Readers therefore see either the old or the new content, never a torn file.

use crate::{MasterDataError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use tracing::debug;

/// Read a file, returning `None` if it does not exist.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MasterDataError::Io {
            message: format!("Failed to read {}", path.display()),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }),
    }
}

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let Some(contents) = read_optional(path)? else {
        return Ok(None);
    };

    let data: T = serde_json::from_slice(&contents).map_err(|e| MasterDataError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Serialize data as JSON and write it atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let serialized = serde_json::to_vec_pretty(data).map_err(|e| MasterDataError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;
    atomic_write(path, &serialized)
}

/// Write bytes to a file atomically.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| MasterDataError::Io {
                message: format!("Failed to create directory {}", parent.display()),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }
    }

    let temp_path = temp_path_for(path);

    let written = write_synced(&temp_path, contents);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        MasterDataError::Io {
            message: format!(
                "Failed to rename {} to {}",
                temp_path.display(),
                path.display()
            ),
            path: Some(path.to_path_buf()),
            source: Some(e),
        }
    })?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

fn write_synced(temp_path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(temp_path)
        .map_err(|e| MasterDataError::Io {
            message: format!("Failed to create temp file {}", temp_path.display()),
            path: Some(temp_path.to_path_buf()),
            source: Some(e),
        })?;

    file.write_all(contents).map_err(|e| MasterDataError::Io {
        message: format!("Failed to write temp file {}", temp_path.display()),
        path: Some(temp_path.to_path_buf()),
        source: Some(e),
    })?;

    file.sync_all().map_err(|e| MasterDataError::Io {
        message: format!("Failed to sync temp file {}", temp_path.display()),
        path: Some(temp_path.to_path_buf()),
        source: Some(e),
    })
}

/// Temp file name unique to this process and thread.
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.{}.tmp", file_name, process::id(), thread_id()))
}

/// Get a unique thread identifier.
fn thread_id() -> u64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    format!("{:?}", thread::current().id()).hash(&mut hasher);
    hasher.finish()
}

/// Whether a directory entry is a leftover temp file.
pub fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}
