//! SH-000: Build error taxonomy.
//!
//! Every fatal condition maps to one category. Nothing is retried; the CLI
//! prints the error and exits non-zero.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors produced while resolving, assembling, uploading or linking.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Unknown branch prefix, missing manifest entry, ambiguous or missing
    /// applet source. Raised before any remote mutation.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed workflow template: a stage link that references a stage
    /// which is not bound before it.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Publish, lookup or delete failed on the remote platform, or a lookup
    /// that must find exactly one object found zero or several.
    #[error("platform error: {0}")]
    Platform(String),

    /// Refused by deployment policy (e.g. replacing a production workflow).
    #[error("policy error: {0}")]
    Policy(String),

    /// Local filesystem failure while staging or persisting.
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Wrap an I/O error with the path it concerns.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Short category name, used in the event log.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Resolution(_) => "resolution",
            Self::Platform(_) => "platform",
            Self::Policy(_) => "policy",
            Self::Io { .. } => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;
