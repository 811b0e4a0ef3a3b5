//! `proxysheet resolve` - print the printing each decklist entry resolves to.

use std::path::Path;

use console::style;
use proxysheet::{EngineConfig, Resolution};

use super::common::{open_engine, resolve_file, FaceModeArg};
use crate::error::CliError;

/// Run the resolve command.
pub fn run(config: EngineConfig, file: &Path, face_mode: FaceModeArg) -> Result<(), CliError> {
    let engine = open_engine(config)?;
    let resolution = resolve_file(&engine, file, face_mode)?;
    print_resolution(&resolution);
    engine.shutdown()?;

    if resolution.is_complete() {
        Ok(())
    } else {
        Err(CliError::Unresolved(resolution.failures.len()))
    }
}

fn print_resolution(resolution: &Resolution) {
    for card in &resolution.cards {
        println!(
            "{:>3}x {} {} [{}]",
            card.quantity,
            style(&card.name).bold(),
            style(format!("({})", card.set_code.to_uppercase())).cyan(),
            card.language
        );
        for url in card.face_urls() {
            println!("       {}", style(url).dim());
        }
    }

    if !resolution.failures.is_empty() {
        println!();
        for failure in &resolution.failures {
            let location = failure
                .source_line
                .map(|line| format!("line {}", line))
                .unwrap_or_else(|| format!("entry {}", failure.index + 1));
            println!(
                "{} {} ({}): {}",
                style("unresolved").yellow(),
                failure.name,
                location,
                failure.reason
            );
        }
    }

    println!();
    println!(
        "{} resolved, {} unresolved",
        resolution.cards.len(),
        resolution.failures.len()
    );
}
