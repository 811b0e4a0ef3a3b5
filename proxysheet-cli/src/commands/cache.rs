//! Cache management CLI commands.

use clap::{Subcommand, ValueEnum};
use proxysheet::{CacheKind, Engine, EngineConfig};

use super::common::format_size_mb;
use crate::error::CliError;

/// Cache selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum CacheTarget {
    /// Downloaded card images
    Image,
    /// Printing search results
    Search,
    /// Valid card name index
    Names,
    /// Every cache
    All,
}

impl CacheTarget {
    fn kinds(self) -> &'static [CacheKind] {
        match self {
            CacheTarget::Image => &[CacheKind::Image],
            CacheTarget::Search => &[CacheKind::Search],
            CacheTarget::Names => &[CacheKind::Names],
            CacheTarget::All => &CacheKind::ALL,
        }
    }
}

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show entry counts and sizes
    Stats,
    /// Remove cached entries, in memory and on disk
    Clear {
        /// Which cache to clear
        #[arg(value_enum, default_value_t = CacheTarget::All)]
        target: CacheTarget,
    },
    /// Show where each cache is stored
    Path,
}

/// Run a cache subcommand.
pub fn run(config: EngineConfig, action: CacheAction) -> Result<(), CliError> {
    let engine = Engine::start(config)?;

    match action {
        CacheAction::Stats => {
            println!("Cache root: {}", engine.config().cache_dir.display());
            for kind in CacheKind::ALL {
                let stats = engine.cache_stats(kind);
                println!(
                    "  {:<7} {:>6} entries  {}",
                    kind.to_string(),
                    stats.count,
                    format_size_mb(stats.size_mb)
                );
            }
        }
        CacheAction::Clear { target } => {
            for &kind in target.kinds() {
                let before = engine.cache_stats(kind);
                engine.clear_cache(kind)?;
                println!("Cleared {} cache ({} entries)", kind, before.count);
            }
        }
        CacheAction::Path => {
            for kind in CacheKind::ALL {
                println!("{:<7} {}", kind.to_string(), engine.cache_path(kind).display());
            }
        }
    }

    engine.shutdown()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_target_covers_every_cache() {
        assert_eq!(CacheTarget::All.kinds(), &CacheKind::ALL);
        assert_eq!(CacheTarget::Search.kinds(), &[CacheKind::Search]);
    }

    #[test]
    fn test_stats_and_clear_on_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        run(EngineConfig::new(dir.path()), CacheAction::Stats).unwrap();
        run(
            EngineConfig::new(dir.path()),
            CacheAction::Clear {
                target: CacheTarget::All,
            },
        )
        .unwrap();
    }
}
