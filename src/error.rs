//! Custom error types and result handling for Hondana operations.
//!
//! Every fallible operation returns a [`Result<T>`], a type alias for
//! `std::result::Result<T, Error>`.
//!
//! Two degraded outcomes are deliberately *not* errors: a partial extraction is a
//! flag on [`ExtractionResult`](crate::types::ExtractionResult), and a missing cover
//! is [`CoverOutcome::NoValidCover`](crate::types::CoverOutcome::NoValidCover).
use std::path::PathBuf;

use crate::types::DownloadStatus;

/// Type alias for Results with Hondana errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all Hondana operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Image decoding/encoding errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    HondanaBuilder(#[from] crate::hondana::HondanaConfigBuilderError),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// No path under the ceiling can be built from the given base directory
    #[error("Path '{0:?}' cannot fit within {1} characters")]
    PathTooLong(PathBuf, usize),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Unsupported operations or source formats
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// A file failed the magic-byte image check
    #[error("Unsupported image format for '{0:?}': {1}")]
    UnsupportedFormat(PathBuf, String),
    /// Resources that couldn't be found
    #[error("Not found: {0}")]
    NotFound(String),
    /// The archive tool exited with a non-recoverable status
    #[error("Archive tool failed (exit code {code:?}): {output}")]
    ArchiveTool { code: Option<i32>, output: String },
    /// The archive tool binary could not be launched
    #[error("Archive tool unavailable: {0}")]
    ToolUnavailable(String),
    /// PDF loading or rendering errors
    #[error("PDF error: {0}")]
    Pdf(String),
    /// Extraction finished but produced no usable page image
    #[error("No page images found in '{0:?}'")]
    NoPages(PathBuf),
    /// Download state machine violation
    #[error("Invalid download transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: DownloadStatus,
        to: DownloadStatus,
    },
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
