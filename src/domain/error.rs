//! Domain error types for the packmule sync runtime
//!
//! This module defines all error types using thiserror for structured error
//! handling. Every error carries a classification that drives retry and
//! propagation decisions throughout the runtime.

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Classification of a runtime error, orthogonal to where it occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable by default: network timeouts, busy resources, rate limits,
    /// upstream 5xx.
    Transient,
    /// Non-retryable, fatal at service start: invalid cron, invalid size,
    /// missing fields, path traversal.
    Configuration,
    /// Non-retryable, surfaces to the caller: canceled, queue full,
    /// duplicate task id, unknown operation id.
    Precondition,
    /// Non-retryable, surfaces and triggers a critical notification:
    /// checksum mismatch, truncated transfer, inconsistent totals.
    Integrity,
    /// Possibly retryable: disk full, permission denied, raw I/O failures.
    System,
}

/// Errors produced by the sync runtime and its agent capabilities.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// A network operation timed out
    #[error("Network timeout: {0}")]
    NetworkTimeout(String),

    /// A resource was busy and the operation could not proceed
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    /// An upstream rate limit was hit
    #[error("Rate limited by upstream")]
    RateLimited,

    /// An upstream service returned an error status
    #[error("Upstream error {status}: {message}")]
    Upstream {
        /// HTTP-like status code reported by the upstream
        status: u16,
        /// Upstream-provided detail
        message: String,
    },

    /// An operation exceeded its configured ceiling
    #[error("Operation timed out after {0:?}")]
    OperationTimeout(Duration),

    /// A cron expression failed to parse
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron {
        /// The offending expression
        expression: String,
        /// Parser diagnostic
        reason: String,
    },

    /// A content type was configured with an unusable size budget
    #[error("Invalid size budget for content type '{0}'")]
    InvalidSizeBudget(String),

    /// A required configuration field is missing
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A configured path escapes its root
    #[error("Path escapes configured root: {0}")]
    PathTraversal(String),

    /// Configuration failed validation
    #[error("Configuration validation failed: {0}")]
    InvalidConfig(String),

    /// The operation was canceled before completion
    #[error("Operation canceled")]
    Canceled,

    /// The executor queue is bounded and full
    #[error("Executor queue is full")]
    QueueFull,

    /// A scheduled task with this id already exists
    #[error("Duplicate scheduled task id: {0}")]
    DuplicateTask(String),

    /// No scheduled task with this id exists
    #[error("Unknown scheduled task id: {0}")]
    UnknownTask(String),

    /// No operation with this id is known to the executor
    #[error("Unknown operation: {0}")]
    UnknownOperation(Uuid),

    /// The host rejected a request because of its lifecycle state
    #[error("Service is not running (state: {0})")]
    NotRunning(String),

    /// A transferred item failed checksum verification
    #[error("Checksum mismatch for '{item}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Destination reference of the item
        item: String,
        /// Digest the source advertised
        expected: String,
        /// Digest computed from the delivered bytes
        actual: String,
    },

    /// Fewer bytes arrived than the source advertised
    #[error("Transfer truncated: wrote {written} of {expected} bytes")]
    TruncatedTransfer {
        /// Bytes actually written
        written: u64,
        /// Bytes the source advertised
        expected: u64,
    },

    /// Progress accounting contradicted itself
    #[error("Inconsistent progress totals: {0}")]
    InconsistentTotals(String),

    /// The destination ran out of space
    #[error("Disk full: {0}")]
    DiskFull(String),

    /// The destination denied access
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// An uncategorized I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Anything an agent reports that does not fit the taxonomy
    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Classify this error per the runtime taxonomy.
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::NetworkTimeout(_)
            | Self::ResourceBusy(_)
            | Self::RateLimited
            | Self::Upstream { .. }
            | Self::OperationTimeout(_) => ErrorClass::Transient,

            Self::InvalidCron { .. }
            | Self::InvalidSizeBudget(_)
            | Self::MissingField(_)
            | Self::PathTraversal(_)
            | Self::InvalidConfig(_) => ErrorClass::Configuration,

            Self::Canceled
            | Self::QueueFull
            | Self::DuplicateTask(_)
            | Self::UnknownTask(_)
            | Self::UnknownOperation(_)
            | Self::NotRunning(_) => ErrorClass::Precondition,

            Self::ChecksumMismatch { .. }
            | Self::TruncatedTransfer { .. }
            | Self::InconsistentTotals(_) => ErrorClass::Integrity,

            Self::DiskFull(_) | Self::PermissionDenied(_) | Self::Io(_) | Self::Other(_) => {
                ErrorClass::System
            }
        }
    }

    /// Returns true if the retry engine may re-execute after this error.
    ///
    /// Transient errors always retry. Of the system class, only disk-full
    /// and raw I/O failures are worth another attempt; permission errors
    /// and unclassified agent errors are not.
    pub const fn is_retryable(&self) -> bool {
        match self.class() {
            ErrorClass::Transient => true,
            ErrorClass::System => matches!(self, Self::DiskFull(_) | Self::Io(_)),
            ErrorClass::Configuration | ErrorClass::Precondition | ErrorClass::Integrity => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => Self::NetworkTimeout(err.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(err.to_string()),
            ErrorKind::StorageFull => Self::DiskFull(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

/// Convenience alias used throughout the runtime.
pub type SyncResult<T> = Result<T, SyncError>;
