//! Error types for the Vellum library
//!
//! Lookups never fail on absence: a missing asset, version or snapshot is
//! reported as `Ok(None)` or an empty collection. The variants below are
//! reserved for backend failures and for input the engine refuses to store.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Vellum library
pub type Result<T> = std::result::Result<T, VellumError>;

/// Main error type for all Vellum operations
#[derive(Debug, Error)]
pub enum VellumError {
    /// I/O errors from the persistence backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage directory has not been initialized
    #[error("Storage not initialized at path: {0:?}")]
    StorageNotInitialized(PathBuf),

    /// Storage directory already exists
    #[error("Storage already exists at path: {0:?}")]
    StorageAlreadyExists(PathBuf),

    /// Blob key that cannot be mapped onto the backend
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Record that is not a JSON object
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Manifest collection that violates entity identity rules
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    /// The same entity id appears twice across the manifest collections
    #[error("Duplicate entity id '{id}' in collection '{collection}' (first seen in '{first_seen_in}')")]
    DuplicateEntityId {
        /// Offending entity id
        id: String,
        /// Collection where the duplicate was found
        collection: String,
        /// Collection where the id was first seen
        first_seen_in: String,
    },

    /// Another writer advanced a persisted index or chain between our read and write
    #[error("Concurrent modification detected: {0}")]
    ConcurrentModification(String),

    /// Another writer held a key lock for longer than the timeout
    #[error("Lock acquisition timeout: {0:?}")]
    LockTimeout(PathBuf),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl VellumError {
    /// Create an invalid record error with a custom message
    pub fn invalid_record(msg: impl Into<String>) -> Self {
        VellumError::InvalidRecord(msg.into())
    }

    /// Create an invalid manifest error with a custom message
    pub fn invalid_manifest(msg: impl Into<String>) -> Self {
        VellumError::InvalidManifest(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        VellumError::Internal(msg.into())
    }

    /// Check if retrying the operation may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VellumError::ConcurrentModification(_) | VellumError::LockTimeout(_)
        )
    }

    /// Check if this error indicates corrupted persisted state
    pub fn is_corruption(&self) -> bool {
        matches!(self, VellumError::Json(_))
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            VellumError::StorageNotInitialized(path) => {
                format!("Storage not initialized at {:?}. Run 'vellum init' first.", path)
            }
            VellumError::ConcurrentModification(what) => {
                format!(
                    "{} was changed by another writer while this operation ran. Reload and try again.",
                    what
                )
            }
            VellumError::LockTimeout(path) => {
                format!(
                    "Timed out waiting for lock {:?}. Another operation may be in progress. Try again later.",
                    path
                )
            }
            VellumError::DuplicateEntityId { id, .. } => {
                format!(
                    "Entity id '{}' is used more than once. Entity ids must be unique across all collections.",
                    id
                )
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VellumError::InvalidKey("../escape".to_string());
        assert_eq!(err.to_string(), "Invalid storage key: ../escape");
    }

    #[test]
    fn test_error_recoverable() {
        assert!(VellumError::ConcurrentModification("snapshot index".to_string()).is_recoverable());
        assert!(VellumError::LockTimeout(PathBuf::from("versions/a.json.lock")).is_recoverable());
        assert!(!VellumError::internal("boom").is_recoverable());
    }

    #[test]
    fn test_duplicate_id_user_message() {
        let err = VellumError::DuplicateEntityId {
            id: "sword-1".to_string(),
            collection: "npcs".to_string(),
            first_seen_in: "items".to_string(),
        };
        assert!(err.to_string().contains("npcs"));
        assert!(err.user_message().contains("unique across all collections"));
    }
}
