//! Flat JSON documents, read and written wholesale.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use wabridge_core::Result;

/// Reads a document, falling back to `T::default()` when the file is
/// missing, empty, or unparsable. An unparsable file is moved aside to
/// `<name>.bak` first so the next write cannot destroy it.
pub fn read_or_default<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(content) = read_content(path)? else {
        return Ok(T::default());
    };
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            let backup = backup_path(path);
            std::fs::rename(path, &backup)?;
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                error = %e,
                "Unparsable document moved aside, starting empty"
            );
            Ok(T::default())
        }
    }
}

/// Like [`read_or_default`], but an unparsable file is an error and stays
/// untouched.
pub fn read_strict<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match read_content(path)? {
        Some(content) => Ok(serde_json::from_str(&content)?),
        None => Ok(T::default()),
    }
}

fn read_content(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(content))
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".bak");
    path.with_file_name(name)
}

/// Overwrites the document with pretty-printed JSON.
pub fn write_pretty<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content)?;
    debug!(path = %path.display(), "Document written");
    Ok(())
}
