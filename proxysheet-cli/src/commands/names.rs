//! Valid card name index commands.

use clap::Subcommand;
use proxysheet::{CacheKind, Engine, EngineConfig};

use crate::error::CliError;

/// Name index subcommands.
#[derive(Debug, Subcommand)]
pub enum NamesAction {
    /// Download the current card name list from the catalog
    Update,
    /// Show how many names are indexed
    Status,
}

/// Run a names subcommand.
pub fn run(config: EngineConfig, action: NamesAction) -> Result<(), CliError> {
    let engine = Engine::start(config)?;

    match action {
        NamesAction::Update => {
            println!("Downloading card names...");
            let count = engine.update_names()?;
            println!("Indexed {} card names", count);
        }
        NamesAction::Status => {
            let stats = engine.cache_stats(CacheKind::Names);
            println!("Indexed names: {}", stats.count);
            println!("Stored at:     {}", engine.cache_path(CacheKind::Names).display());
        }
    }

    engine.shutdown()?;
    Ok(())
}
