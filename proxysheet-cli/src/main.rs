//! proxysheet - command line front end for the proxysheet card engine.
//!
//! Resolves decklists, prefetches card artwork and manages the engine's
//! caches without a GUI host.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::style;
use proxysheet::{init_logging, EngineConfig, LogTargets};

use crate::commands::cache::CacheAction;
use crate::commands::common::FaceModeArg;
use crate::commands::names::NamesAction;
use crate::error::CliError;

#[derive(Debug, Parser)]
#[command(name = "proxysheet", version, about = "Resolve decklists and cache card artwork")]
struct Cli {
    /// Cache root directory (defaults to PROXYSHEET_CACHE_DIR or the user cache dir)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve a decklist file and print the chosen printings
    Resolve {
        /// Decklist file, one entry per line
        file: PathBuf,

        /// Faces to emit for double-faced cards
        #[arg(long, value_enum, default_value_t = FaceModeArg::Both)]
        face_mode: FaceModeArg,
    },

    /// Resolve a decklist and download every image it needs
    Fetch {
        /// Decklist file, one entry per line
        file: PathBuf,

        /// Faces to emit for double-faced cards
        #[arg(long, value_enum, default_value_t = FaceModeArg::Both)]
        face_mode: FaceModeArg,
    },

    /// Inspect or clear the engine caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage the valid card name index
    Names {
        #[command(subcommand)]
        action: NamesAction,
    },
}

fn config_for(cli: &Cli) -> EngineConfig {
    let config = match &cli.cache_dir {
        Some(dir) => EngineConfig::new(dir.clone()),
        None => EngineConfig::from_env(),
    };
    match cli.verbose {
        0 => config,
        1 => config.with_log_filter("proxysheet=debug"),
        _ => config.with_log_filter("proxysheet=trace"),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = config_for(&cli);
    init_logging(&config.log_dir(), config.log_filter.as_deref(), LogTargets::STDERR)?;

    match cli.command {
        Commands::Resolve { file, face_mode } => commands::resolve::run(config, &file, face_mode),
        Commands::Fetch { file, face_mode } => commands::fetch::run(config, &file, face_mode),
        Commands::Cache { action } => commands::cache::run(config, action),
        Commands::Names { action } => commands::names::run(config, action),
    }
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verbose_sets_filter() {
        let cli = Cli::parse_from(["proxysheet", "-vv", "--cache-dir", "/tmp/ps", "cache", "stats"]);
        let config = config_for(&cli);
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/ps"));
        assert_eq!(config.log_filter.as_deref(), Some("proxysheet=trace"));
    }

    #[test]
    fn test_face_mode_default() {
        let cli = Cli::parse_from(["proxysheet", "resolve", "deck.txt"]);
        match cli.command {
            Commands::Resolve { face_mode, .. } => assert_eq!(face_mode, FaceModeArg::Both),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
