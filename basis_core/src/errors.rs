//! # Error Types
//!
//! Structured error types for basis_core. Each variant carries enough
//! context for a discipline client to understand and recover from the
//! failure programmatically.
//!
//! ## Example
//!
//! ```rust
//! use basis_core::errors::{EngineError, EngineResult};
//!
//! fn validate_retention(revisions: usize) -> EngineResult<()> {
//!     if revisions == 0 {
//!         return Err(EngineError::invalid_input(
//!             "revision_retention",
//!             revisions.to_string(),
//!             "At least one revision must be retained",
//!         ));
//!     }
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for basis_core operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Structured error type for engine operations.
///
/// Conflicts and not-found errors are surfaced directly to the originating
/// caller. Derivation failures are recorded on the affected artifact and
/// surfaced asynchronously through its status and the event stream; they
/// are never thrown back to an unrelated caller.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "details")]
pub enum EngineError {
    /// An optimistic write lost the race: the caller's base revisions are
    /// behind the committed state. Refetch and retry.
    #[error("Revision conflict on: {}", conflicting.join(", "))]
    Conflict { conflicting: Vec<String> },

    /// Registering the artifact would close a dependency cycle. Rejected at
    /// registration time; the graph keeps its prior valid state.
    #[error("Registering '{artifact}' would create a cycle through: {}", path.join(" -> "))]
    Cycle {
        artifact: String,
        path: Vec<String>,
    },

    /// A derivation function failed. Localized to its artifact; the pass
    /// continues along independent branches.
    #[error("Derivation failed for '{artifact}': {reason}")]
    Derivation { artifact: String, reason: String },

    /// Unknown identifier, or a historical revision pruned by retention
    #[error("Not found: '{id}' - {reason}")]
    NotFound { id: String, reason: String },

    /// A subscriber's delivery buffer overflowed; the client must resync
    #[error("Subscriber '{client_id}' overflowed its buffer of {capacity} events")]
    SubscriberOverflow { client_id: String, capacity: usize },

    /// An input value is invalid (out of range, wrong type, etc.)
    #[error("Invalid input for '{field}': {value} - {reason}")]
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    /// A required field is missing
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A change request was withdrawn before commit
    #[error("Change request {request_id} was cancelled before commit")]
    Cancelled { request_id: String },

    /// File I/O error
    #[error("File error: {operation} on '{path}' - {reason}")]
    FileError {
        operation: String,
        path: String,
        reason: String,
    },

    /// File is locked by another user/process
    #[error("File locked: '{path}' is locked by {locked_by} since {locked_at}")]
    FileLocked {
        path: String,
        locked_by: String,
        locked_at: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {reason}")]
    SerializationError { reason: String },

    /// Schema version mismatch
    #[error("Version mismatch: file version {file_version}, expected {expected_version}")]
    VersionMismatch {
        file_version: String,
        expected_version: String,
    },

    /// Generic internal error (should be rare)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    /// Create a Conflict error listing the parameters whose base revision lost
    pub fn conflict(conflicting: Vec<String>) -> Self {
        EngineError::Conflict { conflicting }
    }

    /// Create a Cycle error
    pub fn cycle(artifact: impl Into<String>, path: Vec<String>) -> Self {
        EngineError::Cycle {
            artifact: artifact.into(),
            path,
        }
    }

    /// Create a Derivation error
    pub fn derivation(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Derivation {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// Create a NotFound error
    pub fn not_found(id: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::NotFound {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create a SubscriberOverflow error
    pub fn subscriber_overflow(client_id: impl Into<String>, capacity: usize) -> Self {
        EngineError::SubscriberOverflow {
            client_id: client_id.into(),
            capacity,
        }
    }

    /// Create an InvalidInput error
    pub fn invalid_input(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::InvalidInput {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a MissingField error
    pub fn missing_field(field: impl Into<String>) -> Self {
        EngineError::MissingField {
            field: field.into(),
        }
    }

    /// Create a Cancelled error
    pub fn cancelled(request_id: impl Into<String>) -> Self {
        EngineError::Cancelled {
            request_id: request_id.into(),
        }
    }

    /// Create a FileError
    pub fn file_error(
        operation: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        EngineError::FileError {
            operation: operation.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a FileLocked error
    pub fn file_locked(
        path: impl Into<String>,
        locked_by: impl Into<String>,
        locked_at: impl Into<String>,
    ) -> Self {
        EngineError::FileLocked {
            path: path.into(),
            locked_by: locked_by.into(),
            locked_at: locked_at.into(),
        }
    }

    /// Check if this is a recoverable error (e.g., can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict { .. }
                | EngineError::FileLocked { .. }
                | EngineError::Cancelled { .. }
        )
    }

    /// Get a short error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::Conflict { .. } => "CONFLICT",
            EngineError::Cycle { .. } => "CYCLE",
            EngineError::Derivation { .. } => "DERIVATION_FAILED",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::SubscriberOverflow { .. } => "SUBSCRIBER_OVERFLOW",
            EngineError::InvalidInput { .. } => "INVALID_INPUT",
            EngineError::MissingField { .. } => "MISSING_FIELD",
            EngineError::Cancelled { .. } => "CANCELLED",
            EngineError::FileError { .. } => "FILE_ERROR",
            EngineError::FileLocked { .. } => "FILE_LOCKED",
            EngineError::SerializationError { .. } => "SERIALIZATION_ERROR",
            EngineError::VersionMismatch { .. } => "VERSION_MISMATCH",
            EngineError::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let error = EngineError::conflict(vec!["pipeDiameter".to_string()]);
        let json = serde_json::to_string(&error).unwrap();
        let roundtrip: EngineError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, roundtrip);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::missing_field("test").error_code(), "MISSING_FIELD");
        assert_eq!(
            EngineError::not_found("stressCalc", "never registered").error_code(),
            "NOT_FOUND"
        );
        assert_eq!(
            EngineError::cycle("isoDrawing", vec!["isoDrawing".to_string()]).error_code(),
            "CYCLE"
        );
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(EngineError::conflict(vec!["x".to_string()]).is_recoverable());
        assert!(EngineError::cancelled("req-1").is_recoverable());
        assert!(!EngineError::derivation("a", "boom").is_recoverable());
    }
}
