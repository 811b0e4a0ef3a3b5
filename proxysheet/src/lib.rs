//! Proxysheet - card resolution and image caching for proxy sheet generators
//!
//! This library turns decklist text into concrete, image-backed card
//! printings. It resolves card names against a catalog, fetches artwork in
//! cancellable background tasks, and keeps three persistent caches (images,
//! searches, valid card names). UI shells drive it through the flat C
//! boundary in [`ffi`]; Rust callers use [`Engine`] directly.

pub mod cache;
pub mod card;
pub mod catalog;
pub mod config;
pub mod decklist;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod loader;
pub mod logging;
pub mod notify;
pub mod resolver;

pub use cache::{CacheKind, CacheStats, PersistentCache};
pub use card::{copy_faces, expand_image_urls, BackKind, CardPrinting, DecklistEntry, FaceMode, ResolvedCard};
pub use catalog::{Catalog, ScryfallCatalog};
pub use config::EngineConfig;
pub use decklist::parse_decklist;
pub use engine::Engine;
pub use error::{CacheError, CatalogError, EngineError, EngineResult, LoaderError, Status};
pub use loader::{LoadPhase, LoadProgress, TaskHandle};
pub use logging::{init_logging, LogTargets};
pub use notify::{ChangeKind, ImageCacheChange};
pub use resolver::{FailureReason, Resolution, ResolutionFailure};

/// Library version, as reported in the catalog User-Agent.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
