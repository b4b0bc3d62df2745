//! Error types for the session and credit store.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type alias using the store error type.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for store operations.
///
/// Insufficient balance is deliberately not represented here: it is an
/// expected, frequent outcome and is reported as a structured value from
/// [`crate::manager::SessionManager::check_and_charge`].
#[derive(Error, Debug)]
pub enum StoreError {
    /// File read/write failure
    #[error("storage error while {op} {path}: {source}")]
    StorageIo {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Advisory lock not acquired within the retry budget
    #[error("could not lock {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },

    /// Session file exists but cannot be understood
    #[error("corrupt session file {path}: {detail}")]
    CorruptSession { path: PathBuf, detail: String },

    /// Session file written by a newer build
    #[error("unsupported schema version {found} in {path}")]
    UnsupportedSchema { path: PathBuf, found: u32 },

    /// Session serialization failure
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::StorageIo {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Check if this is a lock acquisition failure.
    pub const fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Check if this is a corrupt session file.
    pub const fn is_corrupt_session(&self) -> bool {
        matches!(self, Self::CorruptSession { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_path() {
        let err = StoreError::io(
            "reading session file",
            "/tmp/data/u1.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("reading session file"));
        assert!(msg.contains("u1.json"));
    }

    #[test]
    fn test_error_predicates() {
        let lock = StoreError::LockTimeout {
            path: PathBuf::from("a.json"),
            attempts: 5,
        };
        assert!(lock.is_lock_timeout());
        assert!(!lock.is_corrupt_session());

        let corrupt = StoreError::CorruptSession {
            path: PathBuf::from("a.json"),
            detail: "not json".into(),
        };
        assert!(corrupt.is_corrupt_session());
        assert!(!corrupt.is_lock_timeout());
    }
}
