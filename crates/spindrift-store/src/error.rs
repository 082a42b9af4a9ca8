//! Storage error types for the security index abstraction.

use std::fmt;

/// Errors that can occur during document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested document was not found.
    #[error("Document not found: {id}")]
    NotFound {
        /// The id of the document that was not found.
        id: String,
    },

    /// Attempted to create a document that already exists.
    #[error("Document already exists: {id}")]
    AlreadyExists {
        /// The id of the document that already exists.
        id: String,
    },

    /// A conditional update lost against a concurrent writer.
    #[error("Version conflict on {id}: required seq_no {required_seq_no}, current {current_seq_no}")]
    VersionConflict {
        /// The id of the contended document.
        id: String,
        /// The sequence number the writer required.
        required_seq_no: u64,
        /// The sequence number currently on the document.
        current_seq_no: u64,
    },

    /// One or more shards backing the index are not available. Transient;
    /// callers retry with backoff.
    #[error("Shard not available: {message}")]
    ShardUnavailable {
        /// Description of the unavailability.
        message: String,
    },

    /// The request did not complete within the store's timeout. Transient.
    #[error("Request timed out: {message}")]
    Timeout {
        /// Description of the timeout.
        message: String,
    },

    /// The document source is not usable (not a JSON object, bad field).
    #[error("Invalid document: {message}")]
    InvalidDocument {
        /// Description of why the document is invalid.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists { id: id.into() }
    }

    /// Creates a new `VersionConflict` error.
    #[must_use]
    pub fn version_conflict(
        id: impl Into<String>,
        required_seq_no: u64,
        current_seq_no: u64,
    ) -> Self {
        Self::VersionConflict {
            id: id.into(),
            required_seq_no,
            current_seq_no,
        }
    }

    /// Creates a new `ShardUnavailable` error.
    #[must_use]
    pub fn shard_unavailable(message: impl Into<String>) -> Self {
        Self::ShardUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidDocument` error.
    #[must_use]
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a shard-availability failure.
    #[must_use]
    pub fn is_shard_unavailable(&self) -> bool {
        matches!(self, Self::ShardUnavailable { .. })
    }

    /// Returns `true` if this is a version conflict.
    #[must_use]
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// Returns `true` if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns `true` if the operation may succeed when retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ShardUnavailable { .. } | Self::Timeout { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } | Self::VersionConflict { .. } => ErrorCategory::Conflict,
            Self::ShardUnavailable { .. } | Self::Timeout { .. } => ErrorCategory::Transient,
            Self::InvalidDocument { .. } => ErrorCategory::Validation,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Document not found.
    NotFound,
    /// Conflict (version or existence).
    Conflict,
    /// Transient availability failure.
    Transient,
    /// Validation error.
    Validation,
    /// Internal error.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::Conflict => write!(f, "conflict"),
            Self::Transient => write!(f, "transient"),
            Self::Validation => write!(f, "validation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
