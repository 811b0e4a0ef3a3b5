//! Common types and utilities shared across CLI commands.

use std::path::Path;

use clap::ValueEnum;
use proxysheet::{Engine, EngineConfig, FaceMode, Resolution};

use crate::error::CliError;

/// Face selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum FaceModeArg {
    /// Front face only
    Front,
    /// Back face only (falls back to front for single-faced cards)
    Back,
    /// Front and back as separate images
    Both,
}

impl From<FaceModeArg> for FaceMode {
    fn from(arg: FaceModeArg) -> Self {
        match arg {
            FaceModeArg::Front => FaceMode::FrontOnly,
            FaceModeArg::Back => FaceMode::BackOnly,
            FaceModeArg::Both => FaceMode::BothSides,
        }
    }
}

/// Start an engine, making sure a usable name index is loaded.
pub fn open_engine(config: EngineConfig) -> Result<Engine, CliError> {
    let engine = Engine::start(config)?;
    match engine.ensure_names() {
        Ok(count) => tracing::debug!(count, "Card name index ready"),
        // Resolution still works against the literal names without an index.
        Err(e) => tracing::warn!(error = %e, "Card name index unavailable"),
    }
    Ok(engine)
}

/// Read a decklist file and resolve it.
pub fn resolve_file(engine: &Engine, path: &Path, face_mode: FaceModeArg) -> Result<Resolution, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ReadDecklist {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(engine.parse_and_resolve(&text, face_mode.into()))
}

/// Human-readable size.
pub fn format_size_mb(size_mb: f64) -> String {
    if size_mb >= 1024.0 {
        format!("{:.2} GB", size_mb / 1024.0)
    } else {
        format!("{:.2} MB", size_mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_mode_conversion() {
        assert_eq!(FaceMode::from(FaceModeArg::Front), FaceMode::FrontOnly);
        assert_eq!(FaceMode::from(FaceModeArg::Back), FaceMode::BackOnly);
        assert_eq!(FaceMode::from(FaceModeArg::Both), FaceMode::BothSides);
    }

    #[test]
    fn test_format_size_mb() {
        assert_eq!(format_size_mb(0.5), "0.50 MB");
        assert_eq!(format_size_mb(2048.0), "2.00 GB");
    }

    #[test]
    fn test_resolve_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::start(EngineConfig::new(dir.path())).unwrap();
        let err = resolve_file(&engine, &dir.path().join("missing.txt"), FaceModeArg::Both).unwrap_err();
        assert!(matches!(err, CliError::ReadDecklist { .. }));
        engine.shutdown().unwrap();
    }
}
