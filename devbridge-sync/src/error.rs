//! Error types for devbridge-sync.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use devbridge_core::{EntityRef, Platform};

use crate::platform::PlatformError;

/// All errors that can arise from sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A platform adapter call failed after retries were exhausted.
    #[error("{platform} {operation} failed for {target}: {source}")]
    Platform {
        platform: Platform,
        operation: &'static str,
        target: String,
        #[source]
        source: PlatformError,
    },

    /// The entity lock was not acquired within the configured timeout.
    #[error("timed out after {waited:?} waiting for the sync lock on {entity}")]
    LockTimeout { entity: EntityRef, waited: Duration },

    /// The caller's cancellation token fired before any remote write.
    #[error("sync of {entity} cancelled before any remote write")]
    Cancelled { entity: EntityRef },

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (ledger, audit log, fixtures).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// The underlying platform error, if any.
    pub fn platform_error(&self) -> Option<&PlatformError> {
        match self {
            SyncError::Platform { source, .. } => Some(source),
            _ => None,
        }
    }

    /// A broken credential fails every other entity in the batch as well.
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self.platform_error(), Some(PlatformError::Auth(_)))
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`SyncError::Platform`].
pub(crate) fn platform_err(
    platform: Platform,
    operation: &'static str,
    target: impl ToString,
    source: PlatformError,
) -> SyncError {
    SyncError::Platform {
        platform,
        operation,
        target: target.to_string(),
        source,
    }
}
