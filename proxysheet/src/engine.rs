//! The engine facade.
//!
//! One [`Engine`] owns the three caches, the change queue, the background
//! loader and a dedicated multi-threaded tokio runtime. Callers are plain
//! threads (a UI thread behind the C boundary, or the CLI), so the engine
//! exposes a synchronous API: background loading only spawns onto the
//! runtime, while resolution and the names update block on it.
//!
//! # Example
//!
//! ```ignore
//! use proxysheet::{Engine, EngineConfig, FaceMode};
//!
//! let engine = Engine::start(EngineConfig::from_env())?;
//! engine.ensure_names()?;
//! let resolution = engine.parse_and_resolve("4 Lightning Bolt", FaceMode::BothSides);
//! let handle = engine.start_loading(resolution.cards)?;
//! while !engine.is_finished(handle)? {
//!     std::thread::sleep(std::time::Duration::from_millis(100));
//! }
//! engine.shutdown()?;
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

use crate::cache::{CacheKind, CacheStats, ImageCache, NamesCache, PersistentCache, SearchCache};
use crate::card::{CardPrinting, DecklistEntry, FaceMode, ResolvedCard};
use crate::catalog::{Catalog, PrintingSearch, ScryfallCatalog};
use crate::config::EngineConfig;
use crate::decklist::parse_decklist;
use crate::error::{CacheError, EngineError, EngineResult};
use crate::loader::{BackgroundLoader, ImageFetcher, LoadProgress, LoaderSettings, TaskHandle};
use crate::notify::{ChangeQueue, ImageCacheChange, WakeFn};
use crate::resolver::{Resolution, Resolver};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<dyn Catalog>,
    images: Arc<ImageCache>,
    search_cache: Arc<SearchCache>,
    names: Arc<NamesCache>,
    changes: Arc<ChangeQueue>,
    search: Arc<PrintingSearch>,
    loader: BackgroundLoader,
    runtime: Runtime,
}

impl Engine {
    /// Start an engine talking to the public catalog.
    pub fn start(config: EngineConfig) -> EngineResult<Self> {
        let catalog = ScryfallCatalog::new(&config)?;
        Self::with_catalog(config, Arc::new(catalog))
    }

    /// Start an engine against any catalog implementation.
    pub fn with_catalog(config: EngineConfig, catalog: Arc<dyn Catalog>) -> EngineResult<Self> {
        config.validate().map_err(EngineError::InvalidInput)?;
        fs::create_dir_all(&config.cache_dir).map_err(|source| CacheError::Write {
            path: config.cache_dir.clone(),
            source,
        })?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("proxysheet-worker")
            .enable_all()
            .build()
            .map_err(EngineError::Runtime)?;

        let changes = Arc::new(ChangeQueue::new(
            config.max_queued_events,
            config.wake_coalesce_window,
            Some(runtime.handle().clone()),
        ));
        let images = Arc::new(ImageCache::open(config.image_cache_dir(), Arc::clone(&changes)));
        let search_cache = Arc::new(SearchCache::open(config.search_cache_path()));
        let names = Arc::new(NamesCache::open(config.names_cache_path()));

        let search = Arc::new(PrintingSearch::new(
            Arc::clone(&catalog),
            Arc::clone(&search_cache),
        ));
        let fetcher = Arc::new(ImageFetcher::new(
            Arc::clone(&catalog),
            Arc::clone(&images),
            config.max_concurrent_fetches,
        ));
        let loader = BackgroundLoader::new(
            fetcher,
            Arc::clone(&search),
            runtime.handle().clone(),
            LoaderSettings::from(&config),
        );

        info!(
            cache_dir = %config.cache_dir.display(),
            images = images.len(),
            searches = search_cache.len(),
            names = names.stats().count,
            "Engine started"
        );

        Ok(Self {
            config,
            catalog,
            images,
            search_cache,
            names,
            changes,
            search,
            loader,
            runtime,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- names ----

    /// Make sure a usable name index is loaded.
    ///
    /// A fresh index from disk is kept. A stale or missing one is refetched;
    /// if that fails, a stale index is still used and only a missing one is
    /// an error. Returns the number of known names.
    pub fn ensure_names(&self) -> EngineResult<usize> {
        if self.names.is_fresh(self.config.names_max_age) {
            return Ok(self.names.stats().count as usize);
        }

        match self.update_names() {
            Ok(count) => Ok(count),
            Err(e) => match self.names.index() {
                Some(stale) => {
                    warn!(error = %e, count = stale.len(), "Using stale card names");
                    Ok(stale.len())
                }
                None => Err(e),
            },
        }
    }

    /// Refetch every card name from the catalog. Blocks until done.
    ///
    /// Invalidates the search cache, since cached searches may predate
    /// cards the new index knows about.
    pub fn update_names(&self) -> EngineResult<usize> {
        info!("Updating card names from catalog");
        let names = self.runtime.block_on(self.catalog.card_names())?;
        let index = self.names.replace_all(names);
        self.search_cache.clear()?;
        self.names.persist()?;
        Ok(index.len())
    }

    // ---- resolution ----

    /// Printings of a card, search cache first.
    pub fn search_printings(&self, name: &str) -> EngineResult<Arc<Vec<CardPrinting>>> {
        Ok(self.runtime.block_on(self.search.search(name))?)
    }

    /// Resolve entries to printings. Blocks until every entry is resolved
    /// or has failed.
    pub fn resolve(&self, entries: &[DecklistEntry], global_mode: FaceMode) -> Resolution {
        let resolver = Resolver::new(&self.names, &self.search);
        self.runtime.block_on(resolver.resolve(entries, global_mode))
    }

    /// Tokenize decklist text and resolve it.
    pub fn parse_and_resolve(&self, text: &str, global_mode: FaceMode) -> Resolution {
        let entries = parse_decklist(text);
        self.resolve(&entries, global_mode)
    }

    // ---- background loading ----

    /// Start a background load and return its handle without waiting.
    pub fn start_loading(&self, cards: Vec<ResolvedCard>) -> EngineResult<TaskHandle> {
        Ok(self.loader.start(cards)?)
    }

    pub fn progress(&self, handle: TaskHandle) -> Option<LoadProgress> {
        self.loader.progress(handle)
    }

    pub fn cancel(&self, handle: TaskHandle) -> EngineResult<()> {
        Ok(self.loader.cancel(handle)?)
    }

    pub fn is_finished(&self, handle: TaskHandle) -> EngineResult<bool> {
        Ok(self.loader.is_finished(handle)?)
    }

    /// Cancel every running background load.
    pub fn cancel_all_loads(&self) {
        self.loader.cancel_all();
    }

    // ---- caches ----

    pub fn cache(&self, kind: CacheKind) -> &dyn PersistentCache {
        match kind {
            CacheKind::Image => self.images.as_ref(),
            CacheKind::Search => self.search_cache.as_ref(),
            CacheKind::Names => self.names.as_ref(),
        }
    }

    pub fn cache_stats(&self, kind: CacheKind) -> CacheStats {
        self.cache(kind).stats()
    }

    pub fn cache_path(&self, kind: CacheKind) -> &Path {
        self.cache(kind).path()
    }

    pub fn clear_cache(&self, kind: CacheKind) -> EngineResult<()> {
        info!(cache = %kind, "Clearing cache");
        Ok(self.cache(kind).clear()?)
    }

    /// Persist all three caches. Every cache is attempted; the first
    /// failure is returned.
    pub fn save_caches(&self) -> EngineResult<()> {
        let mut first_error = None;
        for kind in CacheKind::ALL {
            if let Err(e) = self.cache(kind).persist() {
                warn!(cache = %kind, error = %e, "Failed to persist cache");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    pub fn is_image_cached(&self, url: &str) -> bool {
        self.images.contains(url)
    }

    pub fn cached_image(&self, url: &str) -> Option<Bytes> {
        self.images.get(url)
    }

    // ---- change notification ----

    pub fn register_observer(&self, wake: WakeFn) {
        self.changes.register(wake);
    }

    pub fn has_observer(&self) -> bool {
        self.changes.has_observer()
    }

    pub fn unregister_observer(&self) -> bool {
        self.changes.unregister()
    }

    /// Drain queued image cache changes.
    pub fn poll_changes(&self) -> Vec<ImageCacheChange> {
        self.changes.drain()
    }

    /// Drain queued changes through `build`; they stay queued if it fails.
    pub fn poll_changes_with<T, E>(
        &self,
        build: impl FnOnce(&[ImageCacheChange]) -> Result<T, E>,
    ) -> Result<T, E> {
        self.changes.drain_with(build)
    }

    /// Number of changes waiting to be polled.
    pub fn pending_changes(&self) -> usize {
        self.changes.len()
    }

    /// Cancel background work, persist every cache and stop the runtime.
    pub fn shutdown(self) -> EngineResult<()> {
        info!("Shutting down engine");
        self.cancel_all_loads();
        self.changes.unregister();
        let saved = self.save_caches();
        self.runtime.shutdown_timeout(SHUTDOWN_GRACE);
        saved
    }
}
