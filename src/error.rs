//! Error types for the folder download engine.
//!
//! Listing and transfer errors are recovered inside a job (skip, log,
//! continue). Only setup failures end a job with status `error`.

use std::error::Error;
use std::fmt::{self, Display};
use std::io;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug)]
pub enum EngineError {
    /// A directory page could not be listed
    Listing { path: String, message: String },

    /// A single file could not be transferred
    Transfer { path: String, message: String },

    /// The source path of a job is unusable
    InvalidSource { path: String, reason: String },

    /// The destination of a job is unusable
    InvalidDestination { path: String, reason: String },

    /// The local destination directory could not be created
    DestinationCreate { path: String, source: io::Error },

    /// A transfer was aborted by `cancel_all_transfers`
    Cancelled,

    /// Configuration could not be loaded or is invalid
    Config { message: String },
}

impl Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing { path, message } => {
                write!(f, "Failed to list directory {}: {}", path, message)
            }
            Self::Transfer { path, message } => {
                write!(f, "Failed to transfer {}: {}", path, message)
            }
            Self::InvalidSource { path, reason } => {
                write!(f, "Invalid source path '{}': {}", path, reason)
            }
            Self::InvalidDestination { path, reason } => {
                write!(f, "Invalid destination '{}': {}", path, reason)
            }
            Self::DestinationCreate { path, source } => {
                write!(f, "Failed to create destination {}: {}", path, source)
            }
            Self::Cancelled => write!(f, "Transfer cancelled"),
            Self::Config { message } => write!(f, "Invalid configuration: {}", message),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DestinationCreate { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl EngineError {
    pub(crate) fn listing(path: &str, message: impl Display) -> Self {
        Self::Listing {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub(crate) fn transfer(path: &str, message: impl Display) -> Self {
        Self::Transfer {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    /// True for errors that end a job rather than a single directory or file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidSource { .. }
                | Self::InvalidDestination { .. }
                | Self::DestinationCreate { .. }
                | Self::Config { .. }
        )
    }
}
