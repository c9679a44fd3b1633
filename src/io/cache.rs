//! Manifest cache layout and atomic writes
//!
//! The cache is one flat directory of `<depot>_<manifest>.manifest` files;
//! filenames are unique per depot/manifest pair, so concurrent downloads
//! never write the same path. All publishes go through write-then-rename so
//! a crash mid-write can never leave a partial file visible.

use std::io;
use std::path::{Path, PathBuf};

use crate::core::types::{DepotId, ManifestId};

/// Cache location of one manifest file.
pub fn manifest_path(cache_dir: &Path, depot_id: DepotId, manifest_id: ManifestId) -> PathBuf {
    cache_dir.join(format!("{depot_id}_{manifest_id}.manifest"))
}

/// Create a directory (and parents) if missing.
pub async fn ensure_dir(dir: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

/// Write `content` to `path` atomically: temp file in the same directory,
/// then rename into place.
pub async fn write_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await
}
