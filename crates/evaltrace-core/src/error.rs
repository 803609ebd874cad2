//! Error types for history recording and persistence.
//!
//! Missing data is never an error: a quantity that was not recorded for an
//! iteration resolves to `None`. The variants below cover configuration
//! mistakes, out-of-range queries, malformed persisted data and failed I/O.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while recording, persisting or querying a history.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The storage file has a suffix no backend understands.
    ///
    /// This error occurs when a history is created or loaded from a path
    /// whose extension is neither `.csv` nor `.json`.
    #[error("Unsupported history storage format for '{path}': only '.csv' and '.json' are supported")]
    UnsupportedFormat {
        /// The offending storage path
        path: String,
    },

    /// An option holds a value the history cannot work with.
    ///
    /// This error occurs when options fail validation, such as a zero
    /// flush interval or an empty storage file, or when a store refuses
    /// the requested group.
    #[error("Invalid history configuration for '{option}': {reason}")]
    InvalidConfiguration {
        /// Name of the option
        option: String,
        /// Description of the problem
        reason: String,
    },

    /// An option key that does not exist was supplied.
    ///
    /// This error occurs when options parsed from JSON carry a key that is
    /// not a history option.
    #[error("Unknown history option: {key}")]
    UnknownOption {
        /// The unrecognized key
        key: String,
    },

    /// The backend does not keep the data needed for this operation.
    ///
    /// This error occurs when a trace is queried on a backend that only
    /// counts evaluations.
    #[error("Operation '{operation}' is not supported by the {backend} history")]
    Unsupported {
        /// Backend name
        backend: &'static str,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A query addressed an iteration beyond the recorded length.
    ///
    /// This error occurs when a single-iteration accessor receives an index
    /// greater than or equal to the history length.
    #[error("Iteration index {index} out of range for history of length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: usize,
        /// Recorded length
        len: usize,
    },

    /// A stored value does not have the rank expected for its quantity.
    ///
    /// This error occurs when a typed accessor finds, for example, a
    /// matrix where a vector was expected.
    #[error("Stored '{quantity}' is a {actual}, expected a {expected}")]
    TypeMismatch {
        /// Storage key of the quantity
        quantity: &'static str,
        /// Expected kind
        expected: &'static str,
        /// Kind actually found
        actual: &'static str,
    },

    /// Persisted data could not be interpreted.
    ///
    /// This error occurs when array text, a trace header or a stored
    /// dataset is malformed, or when a row does not fit the table layout.
    #[error("Malformed history data: {reason}")]
    Format {
        /// Description of the problem
        reason: String,
    },

    /// The requested run identity has no group in the store.
    ///
    /// This error occurs when a hierarchical history is loaded for an
    /// identity that never wrote to the store.
    #[error("History group '{group}' not found in {}", path.display())]
    MissingGroup {
        /// Group path inside the store
        group: String,
        /// Store location
        path: PathBuf,
    },

    /// Reading or writing the backing file failed.
    ///
    /// This error occurs when the operating system rejects a file
    /// operation. It is not retried.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The storage layer (CSV or JSON codec) rejected the data.
    ///
    /// This error occurs when a file cannot be opened by the codec or does
    /// not parse as the expected document.
    #[error("Storage error on {}: {reason}", path.display())]
    Storage {
        /// File involved
        path: PathBuf,
        /// Description reported by the storage layer
        reason: String,
    },
}

impl HistoryError {
    /// Create an UnsupportedFormat error for a storage path.
    pub fn unsupported_format<S: Into<String>>(path: S) -> Self {
        Self::UnsupportedFormat { path: path.into() }
    }

    /// Create an InvalidConfiguration error.
    pub fn invalid_configuration<S1, S2>(option: S1, reason: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self::InvalidConfiguration {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create an UnknownOption error.
    pub fn unknown_option<S: Into<String>>(key: S) -> Self {
        Self::UnknownOption { key: key.into() }
    }

    /// Create an Unsupported error for a backend operation.
    pub fn unsupported(backend: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { backend, operation }
    }

    /// Create an IndexOutOfRange error.
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        Self::IndexOutOfRange { index, len }
    }

    /// Create a Format error with a custom reason.
    pub fn format<S: Into<String>>(reason: S) -> Self {
        Self::Format {
            reason: reason.into(),
        }
    }

    /// Create a MissingGroup error.
    pub fn missing_group<S: Into<String>>(group: S, path: &Path) -> Self {
        Self::MissingGroup {
            group: group.into(),
            path: path.to_path_buf(),
        }
    }

    /// Wrap an I/O error together with the file it concerns.
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap a storage-layer error together with the file it concerns.
    pub fn storage<E: std::fmt::Display>(path: &Path, error: E) -> Self {
        Self::Storage {
            path: path.to_path_buf(),
            reason: error.to_string(),
        }
    }

    /// Returns true for errors caused by the caller's configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat { .. }
                | Self::InvalidConfiguration { .. }
                | Self::UnknownOption { .. }
        )
    }
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
