//! Error types for module acquisition, caching and presentation.

use thiserror::Error;

/// Errors that can occur while acquiring, caching or presenting a module.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// Transport failure or a non-success status while downloading.
    #[error("download failed for {url}: {reason}")]
    DownloadFailed {
        /// Address that was requested.
        url: String,
        /// Status line or transport error.
        reason: String,
    },

    /// The archive bytes could not be parsed as a zip file.
    #[error("archive is corrupt: {0}")]
    ArchiveCorrupt(String),

    /// A single archive entry could not be decompressed.
    #[error("failed to read archive entry {path}: {reason}")]
    EntryReadFailed {
        /// Path of the entry inside the archive.
        path: String,
        /// Decompression or validation error.
        reason: String,
    },

    /// The cache store rejected a write.
    #[error("failed to write cache entry {address}: {reason}")]
    CacheWriteFailed {
        /// Canonical address being written.
        address: String,
        /// Underlying store error.
        reason: String,
    },

    /// A resource expected in the cache is missing.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// The presentation surface refused to open.
    #[error("presentation surface could not be created: {0}")]
    PopupBlocked(String),

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O error outside of a cache write.
    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    /// Returns a plain-language message suitable for the status overlay.
    #[must_use]
    pub fn user_message(&self) -> &str {
        match self {
            Self::DownloadFailed { .. } => {
                "Unable to load module. Please check your internet connection and try again."
            }
            Self::ArchiveCorrupt(_) | Self::EntryReadFailed { .. } => {
                "The module download was damaged. Please try again."
            }
            Self::CacheWriteFailed { .. } | Self::Io(_) => {
                "The module could not be saved on this device."
            }
            Self::ResourceNotFound(_) => "The module content could not be found.",
            Self::PopupBlocked(_) => "The module window could not be opened.",
            Self::Config(_) => "An unexpected error occurred.",
        }
    }

    /// Whether relaunching the module may succeed without other changes.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DownloadFailed { .. } | Self::ArchiveCorrupt(_) | Self::EntryReadFailed { .. }
        )
    }

    pub(crate) fn download(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::DownloadFailed {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn cache_write(address: impl Into<String>, reason: impl ToString) -> Self {
        Self::CacheWriteFailed {
            address: address.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn entry_read(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::EntryReadFailed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<zip::result::ZipError> for EngineError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::ArchiveCorrupt(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
