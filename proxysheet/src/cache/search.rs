//! Catalog search results keyed by normalized card name.
//!
//! Concurrent searches for the same name are allowed to race; whichever
//! `put` lands last wins. Values are shared as `Arc<Vec<CardPrinting>>` so a
//! hit never copies the printing list.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{remove_if_exists, write_atomic, CacheKind, CacheStats, PersistentCache};
use crate::card::CardPrinting;
use crate::error::CacheError;

/// Cache key for a card name: trimmed, whitespace-collapsed, lowercase.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Serialize)]
struct SearchFileRef<'a> {
    version: &'a str,
    entries: BTreeMap<&'a str, &'a [CardPrinting]>,
}

#[derive(Deserialize)]
struct SearchFile {
    entries: HashMap<String, Vec<CardPrinting>>,
}

/// Search result cache.
pub struct SearchCache {
    path: PathBuf,
    entries: RwLock<HashMap<String, Arc<Vec<CardPrinting>>>>,
    /// Running total of [`entry_bytes`] over all entries.
    size_bytes: AtomicU64,
}

/// Approximate in-memory size of one entry: its key plus every string.
fn entry_bytes(name: &str, printings: &[CardPrinting]) -> u64 {
    let strings: usize = printings
        .iter()
        .map(|p| {
            p.name.len()
                + p.set_code.len()
                + p.language.len()
                + p.front_image_url.len()
                + p.back_image_url.as_ref().map_or(0, String::len)
                + p.back_name.as_ref().map_or(0, String::len)
        })
        .sum();
    (name.len() + strings) as u64
}

impl SearchCache {
    /// Open the cache backed by `path`, loading a previous run's results.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let cache = Self {
            path: path.into(),
            entries: RwLock::new(HashMap::new()),
            size_bytes: AtomicU64::new(0),
        };

        match cache.load() {
            Ok(count) => debug!(path = %cache.path.display(), count, "Loaded search cache"),
            Err(e) => warn!(error = %e, "Ignoring unreadable search cache"),
        }

        cache
    }

    fn load(&self) -> Result<usize, CacheError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: SearchFile = serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let loaded: HashMap<_, _> = file
            .entries
            .into_iter()
            .map(|(name, printings)| (normalize_name(&name), Arc::new(printings)))
            .collect();
        let count = loaded.len();
        let total = loaded
            .iter()
            .map(|(name, printings)| entry_bytes(name, printings))
            .sum();

        let mut entries = self.entries.write();
        *entries = loaded;
        self.size_bytes.store(total, Ordering::Relaxed);
        Ok(count)
    }

    /// Cached printings for a name, if any.
    pub fn get_or_none(&self, name: &str) -> Option<Arc<Vec<CardPrinting>>> {
        self.entries.read().get(&normalize_name(name)).cloned()
    }

    /// Store printings for a name, replacing any previous result.
    pub fn put(&self, name: &str, printings: Vec<CardPrinting>) -> Arc<Vec<CardPrinting>> {
        let key = normalize_name(name);
        let new_size = entry_bytes(&key, &printings);
        let printings = Arc::new(printings);

        // Size is adjusted under the map lock so `clear` cannot interleave.
        let mut entries = self.entries.write();
        if let Some(old) = entries.insert(key.clone(), Arc::clone(&printings)) {
            self.size_bytes
                .fetch_sub(entry_bytes(&key, &old), Ordering::Relaxed);
        }
        self.size_bytes.fetch_add(new_size, Ordering::Relaxed);
        printings
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl PersistentCache for SearchCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Search
    }

    fn stats(&self) -> CacheStats {
        CacheStats::from_bytes(self.len(), self.size_bytes.load(Ordering::Relaxed))
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut entries = self.entries.write();
        let count = entries.len();
        entries.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
        let result = remove_if_exists(&self.path);
        drop(entries);

        info!(count, "Cleared search cache");
        result
    }

    fn persist(&self) -> Result<(), CacheError> {
        let encoded = {
            let entries = self.entries.read();
            let file = SearchFileRef {
                version: crate::VERSION,
                entries: entries
                    .iter()
                    .map(|(name, printings)| (name.as_str(), printings.as_slice()))
                    .collect(),
            };
            serde_json::to_vec(&file).map_err(|e| CacheError::Encode {
                path: self.path.clone(),
                reason: e.to_string(),
            })?
        };

        write_atomic(&self.path, &encoded)?;
        debug!(path = %self.path.display(), "Persisted search cache");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
