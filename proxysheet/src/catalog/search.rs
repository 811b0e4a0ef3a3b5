//! Cache-first printing search.

use std::sync::Arc;

use tracing::debug;

use super::Catalog;
use crate::cache::SearchCache;
use crate::card::CardPrinting;
use crate::error::CatalogError;

/// Printing search that consults the [`SearchCache`] before the catalog.
///
/// Two concurrent misses for the same name both reach the catalog; the later
/// result replaces the earlier one in the cache.
pub struct PrintingSearch {
    catalog: Arc<dyn Catalog>,
    cache: Arc<SearchCache>,
}

impl PrintingSearch {
    pub fn new(catalog: Arc<dyn Catalog>, cache: Arc<SearchCache>) -> Self {
        Self { catalog, cache }
    }

    /// Printings for `name`, from cache when possible.
    pub async fn search(&self, name: &str) -> Result<Arc<Vec<CardPrinting>>, CatalogError> {
        if let Some(hit) = self.cache.get_or_none(name) {
            debug!(name = %name, count = hit.len(), "Search cache hit");
            return Ok(hit);
        }

        debug!(name = %name, "Search cache miss");
        let printings = self.catalog.search_printings(name).await?;
        if printings.is_empty() {
            return Err(CatalogError::NotFound(name.to_string()));
        }
        Ok(self.cache.put(name, printings))
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::mock::{fixtures, StaticCatalog};

    fn search_with(catalog: Arc<StaticCatalog>) -> (PrintingSearch, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(SearchCache::open(dir.path().join("search.json")));
        (PrintingSearch::new(catalog, cache), dir)
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let catalog = Arc::new(fixtures::catalog());
        let (search, _dir) = search_with(Arc::clone(&catalog));

        let first = search.search("Lightning Bolt").await.unwrap();
        let second = search.search("lightning bolt").await.unwrap();

        assert_eq!(first.len(), 3);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(catalog.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let catalog = Arc::new(fixtures::catalog());
        let (search, _dir) = search_with(Arc::clone(&catalog));

        let err = search.search("Black Lotus").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(_)));
        assert!(search.cache().get_or_none("Black Lotus").is_none());

        let _ = search.search("Black Lotus").await;
        assert_eq!(catalog.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_catalog_error_propagates() {
        let catalog = Arc::new(StaticCatalog::new().with_failing_search("Shock"));
        let (search, _dir) = search_with(catalog);

        let err = search.search("Shock").await.unwrap_err();
        assert!(matches!(err, CatalogError::Status { status: 500, .. }));
    }
}
