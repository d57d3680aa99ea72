//! Error types for MediaFerry.
//!
//! This module provides a unified error type for all transfer engine
//! operations, with specific variants for the failure modes a session
//! can run into.

use std::io;

use thiserror::Error;

/// A specialized `Result` type for MediaFerry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for MediaFerry.
#[derive(Error, Debug)]
pub enum Error {
    /// The listening port is already bound by another socket
    #[error("port {port} is already in use")]
    AddressInUse {
        /// Port that could not be bound
        port: u16,
    },

    /// A client addressed an asset outside the batch
    #[error("invalid file index {0}")]
    InvalidIndex(usize),

    /// The asset catalog could not open an asset
    #[error("cannot open '{name}': {reason}")]
    SourceUnavailable {
        /// Display name of the asset
        name: String,
        /// Reason reported by the catalog
        reason: String,
    },

    /// A resume offset could not be reached by skipping
    #[error("failed to seek to offset {requested} (reached {reached})")]
    SeekFailure {
        /// Requested byte offset
        requested: u64,
        /// Bytes actually skipped before the stream ended
        reached: u64,
    },

    /// Some assets could not be deleted after a transfer
    #[error("deleted {deleted} file(s), {failed} could not be deleted")]
    PartialDeletion {
        /// Number of assets deleted
        deleted: usize,
        /// Number of assets that failed to delete
        failed: usize,
    },

    /// A session is already running
    #[error("a transfer session is already running")]
    SessionActive,

    /// The peer violated the line protocol
    #[error("invalid protocol message: {0}")]
    ProtocolError(String),

    /// The peer answered a request with `ERROR`
    #[error("server error: {0}")]
    Remote(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns whether the client can retry the operation later.
    ///
    /// The engine itself never retries; this only tells the presentation
    /// layer whether offering a retry makes sense.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::SeekFailure { .. } | Self::Io(_)
        )
    }

    /// Returns a helpful suggestion for resolving the error, if applicable.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::AddressInUse { .. } => Some(
                "Another program (or another mediaferry session) is using this port.\n\
                 Stop it first, or pick another port with --port",
            ),
            Self::SeekFailure { .. } => Some(
                "The partial download no longer matches the source.\n\
                 Delete the .part file and download the asset again",
            ),
            Self::SessionActive => Some("Stop the running session before starting a new one"),
            Self::PartialDeletion { .. } => Some(
                "The undeleted files are still on the device and are already\n\
                 recorded in the history, so incremental mode will skip them",
            ),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
