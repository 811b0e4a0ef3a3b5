//! Error types for the proxysheet engine.
//!
//! Each subsystem has its own error enum (`CacheError`, `CatalogError`,
//! `LoaderError`); [`EngineError`] wraps them for the engine facade. The
//! C boundary collapses everything into the fixed [`Status`] code set.

use std::ffi::CStr;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised by the on-disk cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Failed to read a cache file or directory.
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    /// Failed to write a cache file or directory.
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    /// A cache file exists but could not be decoded.
    #[error("corrupt cache file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// A cache file could not be encoded.
    #[error("failed to encode cache file {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
}

/// Errors raised by the card catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// The catalog answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// The catalog returned a body we could not decode.
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The catalog has no card with this name.
    #[error("no printings found for '{0}'")]
    NotFound(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Errors raised by the background loader.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    /// No live task carries this handle.
    #[error("unknown background task handle {0}")]
    UnknownHandle(u64),

    /// A load was requested with nothing to load.
    #[error("background load requires at least one entry")]
    EmptyRequest,
}

/// Top-level engine error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    /// No engine instance is running.
    #[error("engine is not initialized")]
    NotInitialized,

    /// Invalid configuration or caller-supplied argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    /// Tracing could not be installed.
    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// Status codes returned across the C boundary.
///
/// `Success` is zero and every failure is negative. The numeric values are
/// part of the public ABI and must not change. `PdfGenerationFailed` belongs
/// to the document renderer that links against this library; the engine
/// itself never produces it.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    NullPointer = -1,
    InvalidInput = -2,
    InitializationFailed = -3,
    ParseFailed = -4,
    PdfGenerationFailed = -5,
    OutOfMemory = -6,
}

impl Status {
    /// Numeric code as seen by C callers.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map a numeric code back to a status, if it is one of ours.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Success),
            -1 => Some(Self::NullPointer),
            -2 => Some(Self::InvalidInput),
            -3 => Some(Self::InitializationFailed),
            -4 => Some(Self::ParseFailed),
            -5 => Some(Self::PdfGenerationFailed),
            -6 => Some(Self::OutOfMemory),
            _ => None,
        }
    }

    /// Static, NUL-terminated description. Never freed by the caller.
    pub fn message(self) -> &'static CStr {
        match self {
            Self::Success => c"Success",
            Self::NullPointer => c"Null pointer argument",
            Self::InvalidInput => c"Invalid input",
            Self::InitializationFailed => c"Engine not initialized or failed to initialize",
            Self::ParseFailed => c"Failed to parse decklist or catalog response",
            Self::PdfGenerationFailed => c"Failed to generate PDF",
            Self::OutOfMemory => c"Out of memory",
        }
    }
}

impl From<&CatalogError> for Status {
    fn from(err: &CatalogError) -> Self {
        match err {
            CatalogError::NotFound(_) => Status::InvalidInput,
            CatalogError::Client(_) => Status::InitializationFailed,
            CatalogError::Network { .. }
            | CatalogError::Status { .. }
            | CatalogError::Decode { .. } => Status::ParseFailed,
        }
    }
}

impl From<&EngineError> for Status {
    fn from(err: &EngineError) -> Self {
        match err {
            EngineError::Catalog(e) => Status::from(e),
            EngineError::Loader(_) | EngineError::InvalidInput(_) => Status::InvalidInput,
            EngineError::Cache(CacheError::Corrupt { .. }) => Status::ParseFailed,
            EngineError::NotInitialized
            | EngineError::Cache(_)
            | EngineError::Runtime(_)
            | EngineError::Logging(_) => Status::InitializationFailed,
        }
    }
}
