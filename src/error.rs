//! Error types for the tracing engine
//!
//! Timer-pairing mistakes are programmer errors and surface synchronously to
//! the caller. Persistence failures are reported and isolated so tracing can
//! never become a source of application failures.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while recording or persisting a trace
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Cannot end {0} because it does not have a matching start")]
    NoMatchingStart(String),

    #[error("Module loader tracing hook is already installed")]
    HookInstalled,

    #[error("Failed to serialize trace events: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write trace to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for trace operations
pub type Result<T> = std::result::Result<T, TraceError>;
