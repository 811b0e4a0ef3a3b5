//! Decklist resolution.
//!
//! Turns tokenized [`DecklistEntry`] values into [`ResolvedCard`]s:
//!
//! 1. Validate the name against the [`NamesCache`], adopting the catalog's
//!    canonical spelling when a match is found. Without a match (or without a
//!    name index) the entry's own name is searched as written.
//! 2. Search the catalog through [`PrintingSearch`] and pick a printing:
//!    both hints, then set only, then language only, then the catalog's
//!    first printing.
//! 3. Pick the face mode: the entry's own mode, else `BackOnly` when the name
//!    matched a back face, else the global mode. Modes needing a back degrade
//!    to `FrontOnly` on single-faced printings.
//!
//! A failing entry is recorded and skipped; the rest of the list still
//! resolves.

use std::fmt;

use tracing::{debug, info, warn};

use crate::cache::NamesCache;
use crate::card::{CardPrinting, DecklistEntry, FaceMode, ResolvedCard};
use crate::catalog::PrintingSearch;
use crate::error::CatalogError;

/// Why an entry failed to resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The catalog has no card by this name.
    UnknownCard,
    /// The catalog could not be queried.
    Catalog(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::UnknownCard => write!(f, "no card with this name"),
            FailureReason::Catalog(reason) => write!(f, "catalog error: {}", reason),
        }
    }
}

/// One entry that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    /// Position in the input list.
    pub index: usize,
    pub name: String,
    pub source_line: Option<u32>,
    pub reason: FailureReason,
}

/// Resolved cards in input order, plus the entries that failed.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub cards: Vec<ResolvedCard>,
    pub failures: Vec<ResolutionFailure>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Choose the printing an entry asks for.
///
/// Catalog order is authoritative; no secondary sort is applied.
pub fn select_printing<'a>(
    printings: &'a [CardPrinting],
    set: Option<&str>,
    language: Option<&str>,
) -> Option<&'a CardPrinting> {
    let set_matches = |p: &CardPrinting| set.is_some_and(|s| p.set_code.eq_ignore_ascii_case(s));
    let lang_matches =
        |p: &CardPrinting| language.is_some_and(|l| p.language.eq_ignore_ascii_case(l));

    printings
        .iter()
        .find(|p| set_matches(p) && lang_matches(p))
        .or_else(|| printings.iter().find(|p| set_matches(p)))
        .or_else(|| printings.iter().find(|p| lang_matches(p)))
        .or_else(|| printings.first())
}

/// Resolves decklist entries against the name index and catalog.
pub struct Resolver<'a> {
    names: &'a NamesCache,
    search: &'a PrintingSearch,
}

impl<'a> Resolver<'a> {
    pub fn new(names: &'a NamesCache, search: &'a PrintingSearch) -> Self {
        Self { names, search }
    }

    /// Resolve every entry, collecting failures instead of stopping.
    pub async fn resolve(&self, entries: &[DecklistEntry], global_mode: FaceMode) -> Resolution {
        let mut resolution = Resolution::default();

        for (index, entry) in entries.iter().enumerate() {
            match self.resolve_entry(entry, global_mode).await {
                Ok(card) => resolution.cards.push(card),
                Err(reason) => {
                    warn!(
                        name = %entry.name,
                        line = ?entry.source_line,
                        reason = %reason,
                        "Failed to resolve decklist entry"
                    );
                    resolution.failures.push(ResolutionFailure {
                        index,
                        name: entry.name.clone(),
                        source_line: entry.source_line,
                        reason,
                    });
                }
            }
        }

        info!(
            resolved = resolution.cards.len(),
            failed = resolution.failures.len(),
            "Resolved decklist"
        );
        resolution
    }

    async fn resolve_entry(
        &self,
        entry: &DecklistEntry,
        global_mode: FaceMode,
    ) -> Result<ResolvedCard, FailureReason> {
        let matched = self.names.find(&entry.name);
        let (search_name, named_back) = match &matched {
            Some(m) => {
                debug!(query = %entry.name, name = %m.name, part = ?m.part, "Matched card name");
                (m.name.as_str(), m.part.is_back())
            }
            None => (entry.name.as_str(), false),
        };

        let printings = self.search.search(search_name).await.map_err(|e| match e {
            CatalogError::NotFound(_) => FailureReason::UnknownCard,
            other => FailureReason::Catalog(other.to_string()),
        })?;

        let printing = select_printing(&printings, entry.set.as_deref(), entry.language.as_deref())
            .ok_or(FailureReason::UnknownCard)?;

        let requested = match (entry.face_mode, named_back) {
            (Some(mode), _) => mode,
            (None, true) => FaceMode::BackOnly,
            (None, false) => global_mode,
        };

        Ok(ResolvedCard::from_printing(printing, entry.quantity, requested))
    }
}
