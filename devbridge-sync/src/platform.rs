//! The narrow contract the sync engine needs from GitHub and Azure DevOps.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use devbridge_core::{EntityType, Platform, Snapshot};

/// Query parameters forwarded to a platform listing call (e.g. `state=open`).
pub type ListFilter = BTreeMap<String, String>;

/// Failure of a single platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("entity not found")]
    NotFound,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Optimistic-concurrency rejection on write.
    #[error("write rejected as conflicting: {0}")]
    WriteConflict(String),

    /// Network failure, timeout, or 5xx.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl PlatformError {
    /// Errors that go away on their own and are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::RateLimited { .. } | PlatformError::Transport(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PlatformError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A platform that stores entities in canonical [`Snapshot`] form.
///
/// Implementations translate between platform-native JSON and snapshots.
/// `write` overwrites the comparable fields of an existing entity; it never
/// creates one.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError>;

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError>;

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError>;
}
