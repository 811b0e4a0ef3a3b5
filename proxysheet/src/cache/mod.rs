//! The engine's three persistent caches.
//!
//! | cache | key | value | on disk |
//! |-------|-----|-------|---------|
//! | [`ImageCache`] | image URL | image bytes | one file per image + bincode index |
//! | [`SearchCache`] | normalized card name | printings in catalog order | JSON |
//! | [`NamesCache`] | - | valid card names | JSON with fetch time |
//!
//! Each cache guards its map with its own lock and no operation ever holds
//! two cache locks at once. All of them implement [`PersistentCache`], the
//! uniform stats / clear / persist / path contract used by the engine and the
//! C boundary.

mod image;
mod names;
mod search;

pub use image::ImageCache;
pub use names::{NameMatch, NamePart, NamesCache, NamesIndex};
pub use search::{normalize_name, SearchCache};

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::CacheError;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Entry count and in-memory size of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub count: u32,
    pub size_mb: f64,
}

impl CacheStats {
    pub fn from_bytes(count: usize, bytes: u64) -> Self {
        Self {
            count: u32::try_from(count).unwrap_or(u32::MAX),
            size_mb: bytes as f64 / BYTES_PER_MB,
        }
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entries, {:.2} MB", self.count, self.size_mb)
    }
}

/// Which of the three caches an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Image,
    Search,
    Names,
}

impl CacheKind {
    pub const ALL: [CacheKind; 3] = [CacheKind::Image, CacheKind::Search, CacheKind::Names];
}

impl fmt::Display for CacheKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKind::Image => write!(f, "image"),
            CacheKind::Search => write!(f, "search"),
            CacheKind::Names => write!(f, "names"),
        }
    }
}

/// Contract shared by every engine cache.
pub trait PersistentCache: Send + Sync {
    /// Short name for logs.
    fn kind(&self) -> CacheKind;

    /// Stats over the in-memory state.
    fn stats(&self) -> CacheStats;

    /// Empty the map and its on-disk shadow.
    ///
    /// Readers see either the old contents or an empty cache, never a mix.
    fn clear(&self) -> Result<(), CacheError>;

    /// Write the whole in-memory map to disk.
    ///
    /// A failure leaves the in-memory state untouched.
    fn persist(&self) -> Result<(), CacheError>;

    /// On-disk location (file or directory).
    fn path(&self) -> &Path;
}

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let write_err = |source| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);

    fs::rename(&temp_path, path).map_err(write_err)
}

/// Remove a file, treating "not there" as success.
pub(crate) fn remove_if_exists(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CacheError::Write {
            path: path.to_path_buf(),
            source,
        }),
    }
}
