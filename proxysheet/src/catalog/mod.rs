//! Card catalog access.
//!
//! The engine talks to the external card database through the [`Catalog`]
//! trait: name search returning every printing, the list of valid card names,
//! and raw image downloads. [`ScryfallCatalog`] is the production
//! implementation; tests substitute an in-memory catalog.
//!
//! [`PrintingSearch`] layers the [`SearchCache`](crate::cache::SearchCache)
//! in front of a catalog so repeated lookups of the same name stay local.

mod scryfall;
mod search;

#[cfg(test)]
pub(crate) mod mock;

pub use scryfall::ScryfallCatalog;
pub use search::PrintingSearch;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::card::CardPrinting;
use crate::error::CatalogError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External card database.
///
/// Implementations must be `Send + Sync`; the engine shares one instance
/// across all worker tasks as `Arc<dyn Catalog>`.
pub trait Catalog: Send + Sync {
    /// Every printing of the card with exactly this name, in catalog order.
    ///
    /// Returns [`CatalogError::NotFound`] when the catalog knows no such card.
    fn search_printings<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Vec<CardPrinting>, CatalogError>>;

    /// Every valid card name.
    fn card_names(&self) -> BoxFuture<'_, Result<Vec<String>, CatalogError>>;

    /// Download the image at `url`.
    fn fetch_image<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Bytes, CatalogError>>;
}
