//! # devbridge-sync
//!
//! Hash-gated entity sync between GitHub and Azure DevOps.
//!
//! Build a [`SyncOrchestrator`] from two [`PlatformAdapter`]s and a
//! [`Ledger`], then call [`SyncOrchestrator::sync_entity`],
//! [`SyncOrchestrator::bulk_sync`], [`SyncOrchestrator::verify_sync`] or
//! [`SyncOrchestrator::resolve_conflict`].

pub mod audit;
pub mod comparator;
pub mod error;
pub mod ledger;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod platform;
pub mod report;
pub mod retry;

pub use audit::{AuditLog, ConflictRecord};
pub use comparator::FieldDiff;
pub use error::SyncError;
pub use ledger::{HashPair, Ledger, LedgerEntry};
pub use locks::LockTable;
pub use memory::{Fixture, MemoryAdapter, Operation};
pub use orchestrator::SyncOrchestrator;
pub use platform::{ListFilter, PlatformAdapter, PlatformError};
pub use report::{
    BulkSyncReport, Resolution, ResolveReport, ResolveStatus, SyncOutcome, SyncStatus,
    VerifyReport,
};
pub use retry::RetryPolicy;
pub use tokio_util::sync::CancellationToken;
