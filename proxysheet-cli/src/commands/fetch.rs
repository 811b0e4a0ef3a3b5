//! `proxysheet fetch` - resolve a decklist and download its artwork.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use proxysheet::{EngineConfig, LoadPhase, LoadProgress};

use super::common::{open_engine, resolve_file, FaceModeArg};
use crate::error::CliError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run the fetch command.
pub fn run(config: EngineConfig, file: &Path, face_mode: FaceModeArg) -> Result<(), CliError> {
    let engine = open_engine(config)?;
    let resolution = resolve_file(&engine, file, face_mode)?;
    for failure in &resolution.failures {
        println!("{} {}: {}", style("skipping").yellow(), failure.name, failure.reason);
    }
    if resolution.cards.is_empty() {
        engine.shutdown()?;
        return Err(CliError::Config("nothing to fetch".to_string()));
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::SeqCst);
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let handle = engine.start_loading(resolution.cards)?;
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg:<12} [{bar:40}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let mut cancel_sent = false;
    let mut last = None;
    while let Some(progress) = engine.progress(handle) {
        update_bar(&bar, &progress);
        last = Some(progress);
        if progress.is_finished() {
            break;
        }
        if interrupted.load(Ordering::SeqCst) && !cancel_sent {
            bar.set_message("cancelling");
            engine.cancel(handle)?;
            cancel_sent = true;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    bar.finish_and_clear();
    // Observing completion releases the task.
    let _ = engine.is_finished(handle);

    if let Some(progress) = last {
        println!(
            "Selected images: {}/{}  Alternatives: {}/{}  Errors: {}",
            progress.selected_loaded,
            progress.total_entries,
            progress.alternatives_loaded,
            progress.total_alternatives,
            progress.error_count
        );
    }
    let stats = engine.cache_stats(proxysheet::CacheKind::Image);
    println!(
        "Image cache: {} images, {}",
        stats.count,
        super::common::format_size_mb(stats.size_mb)
    );

    engine.shutdown()?;
    if cancel_sent {
        return Err(CliError::Interrupted);
    }
    Ok(())
}

fn update_bar(bar: &ProgressBar, progress: &LoadProgress) {
    match progress.phase {
        LoadPhase::Selected => {
            bar.set_length(progress.total_entries as u64);
            bar.set_position(progress.current_entry as u64);
        }
        LoadPhase::Alternatives | LoadPhase::Completed => {
            bar.set_length((progress.total_entries + progress.total_alternatives) as u64);
            bar.set_position((progress.current_entry + progress.alternatives_loaded) as u64);
        }
    }
    bar.set_message(progress.phase.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(phase: LoadPhase) -> LoadProgress {
        LoadProgress {
            phase,
            current_entry: 3,
            total_entries: 4,
            selected_loaded: 3,
            alternatives_loaded: 5,
            total_alternatives: 10,
            error_count: 0,
        }
    }

    #[test]
    fn test_bar_tracks_selected_phase() {
        let bar = ProgressBar::hidden();
        update_bar(&bar, &progress(LoadPhase::Selected));
        assert_eq!(bar.length(), Some(4));
        assert_eq!(bar.position(), 3);
    }

    #[test]
    fn test_bar_extends_for_alternatives() {
        let bar = ProgressBar::hidden();
        update_bar(&bar, &progress(LoadPhase::Alternatives));
        assert_eq!(bar.length(), Some(14));
        assert_eq!(bar.position(), 8);
    }
}
