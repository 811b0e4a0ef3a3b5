//! Coalescing image fetcher.
//!
//! At most one download per URL is in flight across every task. A second
//! caller for the same URL joins the pending download and observes its
//! result instead of issuing its own request.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::ImageCache;
use crate::catalog::{BoxFuture, Catalog};
use crate::error::CatalogError;

type FetchResult = Result<(), Arc<CatalogError>>;
type PendingFetch = Shared<BoxFuture<'static, FetchResult>>;

/// How [`ImageFetcher::ensure_cached`] satisfied a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The image was already in the cache.
    AlreadyCached,
    /// This call downloaded the image.
    Fetched,
    /// Another caller's download was in flight and this call waited on it.
    Joined,
}

pub struct ImageFetcher {
    catalog: Arc<dyn Catalog>,
    images: Arc<ImageCache>,
    limiter: Arc<Semaphore>,
    in_flight: DashMap<String, PendingFetch>,
}

impl ImageFetcher {
    pub fn new(catalog: Arc<dyn Catalog>, images: Arc<ImageCache>, max_concurrent: usize) -> Self {
        Self {
            catalog,
            images,
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: DashMap::new(),
        }
    }

    /// Make sure `url` is in the image cache, downloading it if needed.
    pub async fn ensure_cached(self: &Arc<Self>, url: &str) -> Result<FetchOutcome, Arc<CatalogError>> {
        if self.images.contains(url) {
            return Ok(FetchOutcome::AlreadyCached);
        }

        let (pending, outcome) = match self.in_flight.entry(url.to_string()) {
            Entry::Occupied(entry) => {
                debug!(url = %url, "Joining in-flight fetch");
                (entry.get().clone(), FetchOutcome::Joined)
            }
            Entry::Vacant(entry) => {
                // The previous download may have committed between the cache
                // check above and taking the entry.
                if self.images.contains(url) {
                    return Ok(FetchOutcome::AlreadyCached);
                }
                let pending = self.download(url.to_string()).shared();
                entry.insert(pending.clone());
                (pending, FetchOutcome::Fetched)
            }
        };

        pending.await?;
        Ok(outcome)
    }

    /// Number of downloads currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn download(self: &Arc<Self>, url: String) -> BoxFuture<'static, FetchResult> {
        let this = Arc::clone(self);
        Box::pin(async move {
            let result = this.fetch_and_store(&url).await;
            this.in_flight.remove(&url);
            result.map_err(Arc::new)
        })
    }

    async fn fetch_and_store(&self, url: &str) -> Result<(), CatalogError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|_| CatalogError::Client("image fetch limiter closed".to_string()))?;

        match self.catalog.fetch_image(url).await {
            Ok(bytes) => {
                debug!(url = %url, bytes = bytes.len(), "Fetched image");
                self.images.insert(url, bytes);
                Ok(())
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Image fetch failed");
                Err(e)
            }
        }
    }
}
