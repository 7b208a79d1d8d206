//! Remote metadata store errors

use crate::manifest::ManifestError;
use std::io::{Error as IoError, ErrorKind};

/// Error type for remote manifest and blob operations
#[derive(Debug)]
pub enum StoreError {
    /// Object or manifest absent; an expected outcome during bootstrap
    NotFound(String),
    /// Transport or backend failure
    Io(IoError),
    /// Manifest encoding failure
    Json(serde_json::Error),
    /// Abort token fired or the lazy abort source tripped
    Cancelled(String),
    /// Retry budget exhausted
    DeadlineExceeded { op: &'static str, attempts: u32 },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled(_))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "Not found: {}", what),
            StoreError::Io(e) => write!(f, "I/O error: {}", e),
            StoreError::Json(e) => write!(f, "JSON error: {}", e),
            StoreError::Cancelled(reason) => write!(f, "Cancelled: {}", reason),
            StoreError::DeadlineExceeded { op, attempts } => {
                write!(f, "{} exceeded its deadline after {} attempts", op, attempts)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<IoError> for StoreError {
    fn from(e: IoError) -> Self {
        if e.kind() == ErrorKind::NotFound {
            StoreError::NotFound(e.to_string())
        } else {
            StoreError::Io(e)
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

impl From<ManifestError> for StoreError {
    fn from(e: ManifestError) -> Self {
        match e {
            ManifestError::Json(e) => StoreError::Json(e),
            other => StoreError::Io(IoError::new(ErrorKind::InvalidData, other.to_string())),
        }
    }
}
