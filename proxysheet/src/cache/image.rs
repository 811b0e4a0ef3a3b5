//! Image bytes keyed by URL.
//!
//! Images live in memory as [`Bytes`] so readers get cheap clones. On disk
//! each image is a file named by the SHA-256 of its URL, next to a bincode
//! index mapping URL to file name and size. The index is the source of truth
//! when reloading; files it does not reference are ignored.
//!
//! Every insert and every removal is published to the [`ChangeQueue`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{remove_if_exists, write_atomic, CacheKind, CacheStats, PersistentCache};
use crate::error::CacheError;
use crate::notify::{ChangeKind, ChangeQueue, ImageCacheChange};

const INDEX_FILE: &str = "index.bin";
const IMAGE_EXTENSION: &str = "img";

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    file: String,
    size: u64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ImageIndex {
    version: String,
    entries: HashMap<String, IndexEntry>,
}

/// File name for a URL's image.
fn file_name_for(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let mut name = String::with_capacity(digest.len() * 2 + 4);
    for byte in digest {
        name.push_str(&format!("{:02x}", byte));
    }
    name.push('.');
    name.push_str(IMAGE_EXTENSION);
    name
}

/// In-memory image cache with a directory shadow.
pub struct ImageCache {
    dir: PathBuf,
    entries: RwLock<HashMap<String, Bytes>>,
    size_bytes: AtomicU64,
    /// Serializes disk work between `persist` and `clear`. Taken before the
    /// map lock, never after.
    disk: Mutex<()>,
    changes: Arc<ChangeQueue>,
}

impl ImageCache {
    /// Open the cache at `dir`, loading whatever a previous run persisted.
    ///
    /// A missing directory is an empty cache. A corrupt index is logged and
    /// treated as empty; individual unreadable images are skipped.
    pub fn open(dir: impl Into<PathBuf>, changes: Arc<ChangeQueue>) -> Self {
        let dir = dir.into();
        let cache = Self {
            dir,
            entries: RwLock::new(HashMap::new()),
            size_bytes: AtomicU64::new(0),
            disk: Mutex::new(()),
            changes,
        };

        match cache.load() {
            Ok(0) => debug!(dir = %cache.dir.display(), "Image cache starts empty"),
            Ok(count) => info!(
                dir = %cache.dir.display(),
                count,
                size_mb = format!("{:.1}", cache.stats().size_mb),
                "Loaded image cache"
            ),
            Err(e) => warn!(error = %e, "Ignoring unreadable image cache index"),
        }

        cache
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn load(&self) -> Result<usize, CacheError> {
        let index_path = self.index_path();
        let raw = match fs::read(&index_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Read {
                    path: index_path,
                    source,
                })
            }
        };

        let index: ImageIndex = bincode::deserialize(&raw).map_err(|e| CacheError::Corrupt {
            path: index_path.clone(),
            reason: e.to_string(),
        })?;

        let mut loaded = HashMap::with_capacity(index.entries.len());
        let mut total = 0u64;
        for (url, entry) in index.entries {
            let path = self.dir.join(&entry.file);
            match fs::read(&path) {
                Ok(data) => {
                    total += data.len() as u64;
                    loaded.insert(url, Bytes::from(data));
                }
                Err(e) => warn!(url = %url, error = %e, "Skipping missing cached image"),
            }
        }

        let count = loaded.len();
        *self.entries.write() = loaded;
        self.size_bytes.store(total, Ordering::Relaxed);
        Ok(count)
    }

    /// Whether the URL is cached. Misses while a fetch is still in flight.
    pub fn contains(&self, url: &str) -> bool {
        self.entries.read().contains_key(url)
    }

    /// Cached bytes for the URL.
    pub fn get(&self, url: &str) -> Option<Bytes> {
        self.entries.read().get(url).cloned()
    }

    /// Insert or replace an image and publish a `Cached` change.
    pub fn insert(&self, url: impl Into<String>, data: Bytes) {
        let url = url.into();
        let new_size = data.len() as u64;
        {
            // Size is adjusted under the map lock so `clear` cannot interleave.
            let mut entries = self.entries.write();
            if let Some(old) = entries.insert(url.clone(), data) {
                self.size_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
            }
            self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        }

        debug!(url = %url, bytes = new_size, "Cached image");
        self.changes.push(ImageCacheChange::now(ChangeKind::Cached, url));
    }

    /// Cached URLs, in no particular order.
    pub fn urls(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn clear_dir(&self) -> Result<(), CacheError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() {
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }
}

impl PersistentCache for ImageCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Image
    }

    fn stats(&self) -> CacheStats {
        CacheStats::from_bytes(self.len(), self.size_bytes.load(Ordering::Relaxed))
    }

    fn clear(&self) -> Result<(), CacheError> {
        let disk = self.disk.lock();

        let removed: Vec<String> = {
            let mut entries = self.entries.write();
            self.size_bytes.store(0, Ordering::Relaxed);
            entries.drain().map(|(url, _)| url).collect()
        };

        let result = self.clear_dir();
        // The observer may run on this thread and persist in response.
        drop(disk);

        info!(count = removed.len(), "Cleared image cache");
        self.changes.push_all(
            removed
                .into_iter()
                .map(|url| ImageCacheChange::now(ChangeKind::Removed, url)),
        );

        result
    }

    fn persist(&self) -> Result<(), CacheError> {
        let _disk = self.disk.lock();

        let snapshot: Vec<(String, Bytes)> = self
            .entries
            .read()
            .iter()
            .map(|(url, data)| (url.clone(), data.clone()))
            .collect();

        fs::create_dir_all(&self.dir).map_err(|source| CacheError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let mut index = ImageIndex {
            version: crate::VERSION.to_string(),
            entries: HashMap::with_capacity(snapshot.len()),
        };

        for (url, data) in snapshot {
            let file = file_name_for(&url);
            let path = self.dir.join(&file);
            let on_disk = fs::metadata(&path)
                .map(|m| m.len() == data.len() as u64)
                .unwrap_or(false);
            if !on_disk {
                write_atomic(&path, &data)?;
            }
            index.entries.insert(
                url,
                IndexEntry {
                    file,
                    size: data.len() as u64,
                },
            );
        }

        let index_path = self.index_path();
        let encoded = bincode::serialize(&index).map_err(|e| CacheError::Encode {
            path: index_path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&index_path, &encoded)?;

        debug!(count = index.entries.len(), "Persisted image cache");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.dir
    }
}
