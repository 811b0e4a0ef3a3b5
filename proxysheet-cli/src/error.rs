//! CLI error type.

use std::fmt;
use std::path::PathBuf;

use proxysheet::EngineError;

/// Errors surfaced to the user by `proxysheet` commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or configuration.
    Config(String),
    /// A decklist file could not be read.
    ReadDecklist { path: PathBuf, source: std::io::Error },
    /// The engine reported a failure.
    Engine(EngineError),
    /// Some entries failed to resolve.
    Unresolved(usize),
    /// The user interrupted a running command.
    Interrupted,
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ReadDecklist { path, source } => {
                write!(f, "Cannot read decklist {}: {}", path.display(), source)
            }
            CliError::Engine(e) => write!(f, "{}", e),
            CliError::Unresolved(count) => {
                write!(f, "{} decklist entr{} did not resolve", count, if *count == 1 { "y" } else { "ies" })
            }
            CliError::Interrupted => write!(f, "Interrupted"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ReadDecklist { source, .. } => Some(source),
            CliError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}
