//! The two-phase body of one background load.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fetcher::ImageFetcher;
use super::progress::{LoadPhase, ProgressState};
use super::table::TaskTable;
use crate::card::ResolvedCard;
use crate::catalog::PrintingSearch;

/// Everything a worker needs, moved into its spawned future.
pub(crate) struct LoadJob {
    pub handle: u64,
    pub cards: Vec<ResolvedCard>,
    pub progress: Arc<ProgressState>,
    pub cancel: CancellationToken,
    pub fetcher: Arc<ImageFetcher>,
    pub search: Arc<PrintingSearch>,
    pub table: Arc<Mutex<TaskTable>>,
    pub max_concurrent: usize,
}

impl LoadJob {
    pub async fn run(self) {
        let started = Instant::now();
        info!(handle = self.handle, entries = self.cards.len(), "Background load started");

        self.load_selected().await;
        if !self.cancel.is_cancelled() {
            self.progress.advance_to(LoadPhase::Alternatives);
            debug!(handle = self.handle, "Entering alternatives phase");
            self.load_alternatives().await;
        }

        self.progress.advance_to(LoadPhase::Completed);
        self.table.lock().mark_completed(self.handle, Instant::now());

        let snapshot = self.progress.snapshot();
        if self.cancel.is_cancelled() {
            info!(
                handle = self.handle,
                selected = snapshot.selected_loaded,
                alternatives = snapshot.alternatives_loaded,
                "Background load cancelled"
            );
        } else {
            info!(
                handle = self.handle,
                selected = snapshot.selected_loaded,
                alternatives = snapshot.alternatives_loaded,
                errors = snapshot.error_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Background load completed"
            );
        }
    }

    /// Fetch every face of every selected printing, in entry order.
    async fn load_selected(&self) {
        for card in &self.cards {
            let mut loaded = true;
            for url in card.face_urls() {
                if self.cancel.is_cancelled() {
                    return;
                }
                if let Err(e) = self.fetcher.ensure_cached(url).await {
                    debug!(handle = self.handle, url = %url, error = %e, "Selected image failed");
                    self.progress.record_error();
                    loaded = false;
                }
            }
            self.progress.entry_done(loaded);
        }
    }

    /// Pre-fetch the front image of every other printing of each card.
    async fn load_alternatives(&self) {
        let selected: HashSet<&str> = self.cards.iter().flat_map(|c| c.face_urls()).collect();

        let mut seen_names = HashSet::new();
        let mut seen_urls = HashSet::new();
        let mut urls = Vec::new();
        for card in &self.cards {
            if !seen_names.insert(card.name.as_str()) {
                continue;
            }
            if self.cancel.is_cancelled() {
                return;
            }
            match self.search.search(&card.name).await {
                Ok(printings) => {
                    for printing in printings.iter() {
                        let url = printing.front_image_url.as_str();
                        if !selected.contains(url) && seen_urls.insert(url.to_string()) {
                            urls.push(url.to_string());
                        }
                    }
                }
                Err(e) => {
                    warn!(handle = self.handle, name = %card.name, error = %e, "Alternative search failed");
                    self.progress.record_error();
                }
            }
        }

        self.progress.set_total_alternatives(urls.len());
        debug!(handle = self.handle, total = urls.len(), "Alternatives enumerated");

        stream::iter(urls)
            .for_each_concurrent(self.max_concurrent.max(1), |url| async move {
                if self.cancel.is_cancelled() {
                    return;
                }
                match self.fetcher.ensure_cached(&url).await {
                    Ok(_) => self.progress.alternative_loaded(),
                    Err(e) => {
                        debug!(handle = self.handle, url = %url, error = %e, "Alternative image failed");
                        self.progress.record_error();
                    }
                }
            })
            .await;
    }
}
