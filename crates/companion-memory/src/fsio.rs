//! Small file helpers shared by the buffer, store and runtime state.
//!
//! Appends are a single `write_all` on a file opened in append mode.
//! Rewrites go through a temp file in the same directory followed by a
//! rename, so readers see either the old or the new contents.
//!
//! The helpers themselves are synchronous.  Async callers hand them to
//! [`blocking`] so fsync never stalls a runtime worker.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::{MemoryError, Result};

/// Run file work on the blocking thread pool.
pub(crate) async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Make sure the parent directory of `path` exists.
pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| MemoryError::persistence(dir, e))?;
    }
    Ok(())
}

/// Append `bytes` to `path` with one write and flush them to disk.
pub(crate) fn append_durable(path: &Path, bytes: &[u8]) -> Result<()> {
    let io = |e| MemoryError::persistence(path, e);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(io)?;
    file.write_all(bytes).map_err(io)?;
    file.sync_data().map_err(io)
}

/// Replace the contents of `path` atomically.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let io = |e| MemoryError::persistence(path, e);
    ensure_parent(path)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io)?;
    tmp.write_all(bytes).map_err(io)?;
    tmp.as_file().sync_all().map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    Ok(())
}

/// Read `path` to a string.  A missing file reads as empty.
pub(crate) fn read_or_empty(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(MemoryError::persistence(path, e)),
    }
}
