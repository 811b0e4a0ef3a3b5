//! Index of valid card names used to validate decklist entries.
//!
//! The index is immutable once built. An update builds a complete new
//! [`NamesIndex`] off to the side and swaps it in under the write lock, so a
//! reader holds either the old index or the new one.
//!
//! # Lookup order
//!
//! 1. Exact match on the normalized full name.
//! 2. Exact match on one face of a multi-part name (`"Cut // Ribbons"` matches
//!    both `"cut"` and `"ribbons"`).
//! 3. Closest full name by Jaro-Winkler similarity, if it clears
//!    [`FUZZY_THRESHOLD`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::search::normalize_name;
use super::{remove_if_exists, write_atomic, CacheKind, CacheStats, PersistentCache};
use crate::error::CacheError;

/// Minimum similarity for a fuzzy match.
pub const FUZZY_THRESHOLD: f64 = 0.92;

const FACE_SEPARATOR: &str = "//";

/// Which part of a name matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamePart {
    /// The whole name.
    Full,
    /// One face of a multi-part name, zero-based.
    Face(usize),
}

impl NamePart {
    /// True when the query named a face after the first.
    pub fn is_back(self) -> bool {
        matches!(self, NamePart::Face(index) if index > 0)
    }
}

/// Result of a name lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct NameMatch {
    /// Canonical full name as the catalog spells it.
    pub name: String,
    pub part: NamePart,
    /// 1.0 for exact matches.
    pub similarity: f64,
}

/// Immutable lookup structure over the catalog's card names.
#[derive(Debug)]
pub struct NamesIndex {
    names: Vec<String>,
    normalized: Vec<String>,
    by_name: HashMap<String, usize>,
    by_face: HashMap<String, (usize, usize)>,
    fetched_at: DateTime<Utc>,
    bytes: u64,
}

impl NamesIndex {
    /// Build an index from canonical names fetched at `fetched_at`.
    pub fn build(names: Vec<String>, fetched_at: DateTime<Utc>) -> Self {
        let mut names = names;
        names.retain(|n| !n.trim().is_empty());

        let normalized: Vec<String> = names.iter().map(|n| normalize_name(n)).collect();
        let mut by_name = HashMap::with_capacity(names.len());
        let mut by_face = HashMap::new();

        for (index, key) in normalized.iter().enumerate() {
            by_name.entry(key.clone()).or_insert(index);

            if key.contains(FACE_SEPARATOR) {
                for (face, part) in key.split(FACE_SEPARATOR).enumerate() {
                    let part = part.trim();
                    if !part.is_empty() {
                        by_face.entry(part.to_string()).or_insert((index, face));
                    }
                }
            }
        }

        let bytes = names.iter().map(|n| n.len() as u64).sum();

        Self {
            names,
            normalized,
            by_name,
            by_face,
            fetched_at,
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// Whether the index is younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.fetched_at);
        match age.to_std() {
            Ok(age) => age < max_age,
            // Fetched "in the future": clock skew, treat as fresh.
            Err(_) => true,
        }
    }

    /// Look up a decklist name.
    pub fn find(&self, query: &str) -> Option<NameMatch> {
        let key = normalize_name(query);
        if key.is_empty() {
            return None;
        }

        if let Some(&index) = self.by_name.get(&key) {
            return Some(self.matched(index, NamePart::Full, 1.0));
        }

        if let Some(&(index, face)) = self.by_face.get(&key) {
            return Some(self.matched(index, NamePart::Face(face), 1.0));
        }

        let (index, score) = self
            .normalized
            .iter()
            .enumerate()
            .map(|(i, candidate)| (i, strsim::jaro_winkler(&key, candidate)))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        (score >= FUZZY_THRESHOLD).then(|| self.matched(index, NamePart::Full, score))
    }

    fn matched(&self, index: usize, part: NamePart, similarity: f64) -> NameMatch {
        NameMatch {
            name: self.names[index].clone(),
            part,
            similarity,
        }
    }
}

#[derive(Serialize)]
struct NamesFileRef<'a> {
    fetched_at: DateTime<Utc>,
    names: &'a [String],
}

#[derive(Deserialize)]
struct NamesFile {
    fetched_at: DateTime<Utc>,
    names: Vec<String>,
}

/// Holder for the current [`NamesIndex`].
pub struct NamesCache {
    path: PathBuf,
    index: RwLock<Option<Arc<NamesIndex>>>,
}

impl NamesCache {
    /// Open the cache backed by `path`. Staleness is not checked here.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let cache = Self {
            path: path.into(),
            index: RwLock::new(None),
        };

        match cache.load() {
            Ok(Some(count)) => debug!(path = %cache.path.display(), count, "Loaded card names"),
            Ok(None) => debug!(path = %cache.path.display(), "No card names on disk"),
            Err(e) => warn!(error = %e, "Ignoring unreadable card names file"),
        }

        cache
    }

    fn load(&self) -> Result<Option<usize>, CacheError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: NamesFile = serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let index = NamesIndex::build(file.names, file.fetched_at);
        let count = index.len();
        *self.index.write() = Some(Arc::new(index));
        Ok(Some(count))
    }

    /// The current index, if one was loaded or fetched.
    pub fn index(&self) -> Option<Arc<NamesIndex>> {
        self.index.read().clone()
    }

    /// Whether an index exists and is younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.index().is_some_and(|index| index.is_fresh(max_age))
    }

    /// Swap in a new index built from `names`.
    pub fn replace_all(&self, names: Vec<String>) -> Arc<NamesIndex> {
        let index = Arc::new(NamesIndex::build(names, Utc::now()));
        *self.index.write() = Some(Arc::clone(&index));
        info!(count = index.len(), "Replaced card name index");
        index
    }

    /// Look up a name against the current index.
    pub fn find(&self, name: &str) -> Option<NameMatch> {
        self.index().and_then(|index| index.find(name))
    }

    /// Whether the name resolves to a known card.
    pub fn contains_fuzzy(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}

impl PersistentCache for NamesCache {
    fn kind(&self) -> CacheKind {
        CacheKind::Names
    }

    fn stats(&self) -> CacheStats {
        match self.index() {
            Some(index) => CacheStats::from_bytes(index.len(), index.bytes),
            None => CacheStats::default(),
        }
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut index = self.index.write();
        *index = None;
        let result = remove_if_exists(&self.path);
        drop(index);

        info!("Cleared card name index");
        result
    }

    fn persist(&self) -> Result<(), CacheError> {
        let Some(index) = self.index() else {
            return Ok(());
        };

        let file = NamesFileRef {
            fetched_at: index.fetched_at,
            names: &index.names,
        };
        let encoded = serde_json::to_vec(&file).map_err(|e| CacheError::Encode {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        write_atomic(&self.path, &encoded)?;
        debug!(path = %self.path.display(), "Persisted card names");
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_names() -> Vec<String> {
        [
            "Lightning Bolt",
            "Brainstorm",
            "Cut // Ribbons",
            "Fable of the Mirror-Breaker // Reflection of Kiki-Jiki",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_exact_match_returns_canonical_spelling() {
        let index = NamesIndex::build(sample_names(), Utc::now());
        let hit = index.find("lightning bolt").unwrap();
        assert_eq!(hit.name, "Lightning Bolt");
        assert_eq!(hit.part, NamePart::Full);
        assert_eq!(hit.similarity, 1.0);
    }

    #[test]
    fn test_face_match() {
        let index = NamesIndex::build(sample_names(), Utc::now());

        let front = index.find("cut").unwrap();
        assert_eq!(front.name, "Cut // Ribbons");
        assert_eq!(front.part, NamePart::Face(0));
        assert!(!front.part.is_back());

        let back = index.find("Ribbons").unwrap();
        assert_eq!(back.name, "Cut // Ribbons");
        assert_eq!(back.part, NamePart::Face(1));
        assert!(back.part.is_back());

        let fable = index.find("Fable of the Mirror-Breaker").unwrap();
        assert_eq!(fable.part, NamePart::Face(0));
    }

    #[test]
    fn test_fuzzy_match_typo() {
        let index = NamesIndex::build(sample_names(), Utc::now());
        let hit = index.find("Lightening Bolt").unwrap();
        assert_eq!(hit.name, "Lightning Bolt");
        assert!(hit.similarity < 1.0);
        assert!(hit.similarity >= FUZZY_THRESHOLD);
    }

    #[test]
    fn test_no_match() {
        let index = NamesIndex::build(sample_names(), Utc::now());
        assert!(index.find("Completely Unrelated Words").is_none());
        assert!(index.find("   ").is_none());
    }

    #[test]
    fn test_freshness() {
        let fresh = NamesIndex::build(sample_names(), Utc::now());
        assert!(fresh.is_fresh(Duration::from_secs(60)));

        let old = NamesIndex::build(sample_names(), Utc::now() - chrono::Duration::hours(25));
        assert!(!old.is_fresh(Duration::from_secs(24 * 60 * 60)));
    }

    #[test]
    fn test_uninitialized_cache_reports_zero() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NamesCache::open(dir.path().join("names.json"));
        assert_eq!(cache.stats().count, 0);
        assert!(cache.index().is_none());
        assert!(!cache.contains_fuzzy("Lightning Bolt"));
        assert!(!cache.is_fresh(Duration::from_secs(60)));
        // Persisting nothing is not an error.
        cache.persist().unwrap();
    }

    #[test]
    fn test_replace_all_swaps_whole_index() {
        let dir = tempfile::tempdir().unwrap();
        let cache = NamesCache::open(dir.path().join("names.json"));

        cache.replace_all(sample_names());
        let before = cache.index().unwrap();
        cache.replace_all(vec!["Island".to_string()]);

        // A reader holding the old index keeps a consistent view.
        assert_eq!(before.len(), 4);
        assert!(before.find("Brainstorm").is_some());
        assert_eq!(cache.stats().count, 1);
        assert!(!cache.contains_fuzzy("Brainstorm"));
    }

    #[test]
    fn test_persist_round_trip_keeps_fetch_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        let fetched_at = {
            let cache = NamesCache::open(&path);
            let index = cache.replace_all(sample_names());
            cache.persist().unwrap();
            index.fetched_at()
        };

        let reopened = NamesCache::open(&path);
        assert_eq!(reopened.stats().count, 4);
        assert_eq!(reopened.index().unwrap().fetched_at(), fetched_at);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        let cache = NamesCache::open(&path);
        cache.replace_all(sample_names());
        cache.persist().unwrap();

        cache.clear().unwrap();
        assert_eq!(cache.stats().count, 0);
        assert!(!path.exists());
    }
}
