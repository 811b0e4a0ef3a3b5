//! In-memory catalog for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::{BoxFuture, Catalog};
use crate::cache::normalize_name;
use crate::card::{BackKind, CardPrinting};
use crate::error::CatalogError;

/// Catalog double with fixed contents, call counters and fault injection.
#[derive(Default)]
pub(crate) struct StaticCatalog {
    printings: HashMap<String, Vec<CardPrinting>>,
    names: Vec<String>,
    failing_urls: HashSet<String>,
    gates: HashMap<String, Arc<Semaphore>>,
    failing_searches: HashSet<String>,
    latency: Duration,
    search_calls: AtomicUsize,
    name_calls: AtomicUsize,
    image_fetches: Mutex<HashMap<String, usize>>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every printing of one card. The first is the catalog default.
    pub fn with_card(mut self, printings: Vec<CardPrinting>) -> Self {
        if let Some(first) = printings.first() {
            self.names.push(first.name.clone());
            self.printings.insert(normalize_name(&first.name), printings);
        }
        self
    }

    pub fn with_failing_url(mut self, url: impl Into<String>) -> Self {
        self.failing_urls.insert(url.into());
        self
    }

    /// Hold fetches of `url` until `gate` hands out a permit. The fetch is
    /// counted before it waits.
    pub fn with_gate(mut self, url: impl Into<String>, gate: Arc<Semaphore>) -> Self {
        self.gates.insert(url.into(), gate);
        self
    }

    pub fn with_failing_search(mut self, name: &str) -> Self {
        self.failing_searches.insert(normalize_name(name));
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn name_calls(&self) -> usize {
        self.name_calls.load(Ordering::SeqCst)
    }

    pub fn image_fetches(&self, url: &str) -> usize {
        self.image_fetches.lock().get(url).copied().unwrap_or(0)
    }

    pub fn total_image_fetches(&self) -> usize {
        self.image_fetches.lock().values().sum()
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// Printings used across the unit tests.
pub(crate) mod fixtures {
    use super::*;

    pub fn bolt(set: &str) -> CardPrinting {
        CardPrinting::single(
            "Lightning Bolt",
            set,
            "en",
            format!("https://img.test/{}/bolt.jpg", set),
        )
    }

    pub fn bolt_lang(set: &str, lang: &str) -> CardPrinting {
        CardPrinting::single(
            "Lightning Bolt",
            set,
            lang,
            format!("https://img.test/{}/{}/bolt.jpg", set, lang),
        )
    }

    pub fn fable(set: &str) -> CardPrinting {
        CardPrinting::single(
            "Fable of the Mirror-Breaker // Reflection of Kiki-Jiki",
            set,
            "en",
            format!("https://img.test/{}/fable-front.jpg", set),
        )
        .with_back(
            BackKind::DoubleFaced,
            "Reflection of Kiki-Jiki",
            format!("https://img.test/{}/fable-back.jpg", set),
        )
    }

    /// Bolt in three sets, Fable in two.
    pub fn catalog() -> StaticCatalog {
        StaticCatalog::new()
            .with_card(vec![bolt("m10"), bolt("lea"), bolt("2x2")])
            .with_card(vec![fable("neo"), fable("pneo")])
    }
}

impl Catalog for StaticCatalog {
    fn search_printings<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CardPrinting>, CatalogError>> {
        Box::pin(async move {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            self.delay().await;

            let key = normalize_name(name);
            if self.failing_searches.contains(&key) {
                return Err(CatalogError::Status {
                    url: format!("static://search/{}", key),
                    status: 500,
                });
            }
            self.printings
                .get(&key)
                .cloned()
                .ok_or_else(|| CatalogError::NotFound(name.to_string()))
        })
    }

    fn card_names(&self) -> BoxFuture<'_, Result<Vec<String>, CatalogError>> {
        Box::pin(async move {
            self.name_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.names.clone())
        })
    }

    fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, CatalogError>> {
        Box::pin(async move {
            *self.image_fetches.lock().entry(url.to_string()).or_insert(0) += 1;
            if let Some(gate) = self.gates.get(url) {
                let _permit = gate.acquire().await;
            }
            self.delay().await;

            if self.failing_urls.contains(url) {
                return Err(CatalogError::Status {
                    url: url.to_string(),
                    status: 404,
                });
            }
            Ok(Bytes::from(format!("image:{}", url)))
        })
    }
}
