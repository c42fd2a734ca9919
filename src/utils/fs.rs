//! Filesystem helpers
//!
//! Working directory preparation, atomic replacement of small files and
//! content fingerprints.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use super::error::AppResult;

/// Create `dir`, or empty it if it already exists.
pub fn prepare_dir(dir: &Path) -> AppResult<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        return Ok(());
    }

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }

    tracing::debug!("Cleared working directory {:?}", dir);
    Ok(())
}

/// Replace `path` with `data` so readers only ever see a complete file.
///
/// The temp file lives next to the target so the final rename stays on one
/// filesystem.
pub fn write_atomic(path: &Path, data: &[u8]) -> AppResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// BLAKE3 digest of `data`, hex encoded.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}
