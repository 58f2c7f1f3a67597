//! Result types returned by the orchestrator and printed by the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devbridge_core::{EntityRef, EntityType, Platform, SyncDirection};

use crate::comparator::FieldDiff;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    NoSyncNeeded,
    /// Bidirectional sync could not pick a winner; nothing was written.
    Conflict,
    Failed,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::NoSyncNeeded => "no_sync_needed",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `sync_entity` attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub entity: EntityRef,
    pub status: SyncStatus,
    /// Direction actually applied. For a bidirectional request that wrote,
    /// this is the resolved one-way direction.
    pub direction: SyncDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_to: Option<Platform>,
    pub timestamp: DateTime<Utc>,
    /// Fields that differed before the sync, source on the left.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub differences: Vec<FieldDiff>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SyncOutcome {
    pub(crate) fn new(entity: EntityRef, status: SyncStatus, direction: SyncDirection) -> Self {
        Self {
            entity,
            status,
            direction,
            written_to: None,
            timestamp: Utc::now(),
            differences: Vec::new(),
            error: None,
        }
    }

    /// A failed entry inside a bulk report.
    pub fn failed(entity: EntityRef, direction: SyncDirection, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(entity, SyncStatus::Failed, direction)
        }
    }

    pub(crate) fn from_error(entity: EntityRef, direction: SyncDirection, err: &SyncError) -> Self {
        Self::failed(entity, direction, err)
    }
}

/// Aggregate result of `bulk_sync`.
///
/// `successful + failed + skipped + conflicts == total` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkSyncReport {
    pub entity_type: EntityType,
    pub direction: SyncDirection,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Entities that needed no write.
    pub skipped: usize,
    pub conflicts: usize,
    /// Set when a batch-fatal error stopped scheduling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub results: Vec<SyncOutcome>,
}

impl BulkSyncReport {
    pub(crate) fn tally(
        entity_type: EntityType,
        direction: SyncDirection,
        start_time: DateTime<Utc>,
        results: Vec<SyncOutcome>,
        aborted: Option<String>,
    ) -> Self {
        let count = |status: SyncStatus| results.iter().filter(|r| r.status == status).count();
        Self {
            entity_type,
            direction,
            total: results.len(),
            successful: count(SyncStatus::Synced),
            failed: count(SyncStatus::Failed),
            skipped: count(SyncStatus::NoSyncNeeded),
            conflicts: count(SyncStatus::Conflict),
            aborted,
            start_time,
            end_time: Utc::now(),
            results,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.aborted.is_some()
    }
}

/// Read-only comparison of both sides of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub entity: EntityRef,
    pub github_hash: String,
    pub azure_hash: String,
    pub is_synced: bool,
    /// GitHub on the left, Azure on the right.
    pub differences: Vec<FieldDiff>,
    pub last_sync: Option<DateTime<Utc>>,
    pub verification_time: DateTime<Utc>,
}

/// Which side wins a manual conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub source: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStatus {
    NoConflict,
    Resolved,
    Failed,
}

impl std::fmt::Display for ResolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ResolveStatus::NoConflict => "no_conflict",
            ResolveStatus::Resolved => "resolved",
            ResolveStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub entity: EntityRef,
    pub status: ResolveStatus,
    pub resolution: Resolution,
    pub before: VerifyReport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<VerifyReport>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: SyncStatus) -> SyncOutcome {
        SyncOutcome::new(
            EntityRef::new(EntityType::Issue, id),
            status,
            SyncDirection::GithubToAzure,
        )
    }

    #[test]
    fn tally_counts_every_status_once() {
        let report = BulkSyncReport::tally(
            EntityType::Issue,
            SyncDirection::GithubToAzure,
            Utc::now(),
            vec![
                outcome("1", SyncStatus::Synced),
                outcome("2", SyncStatus::NoSyncNeeded),
                outcome("3", SyncStatus::Failed),
                outcome("4", SyncStatus::Conflict),
                outcome("5", SyncStatus::Synced),
            ],
            None,
        );
        assert_eq!(report.total, 5);
        assert_eq!(report.successful, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.conflicts, 1);
        assert!(report.has_failures());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_value(outcome("42", SyncStatus::NoSyncNeeded)).unwrap();
        assert_eq!(json["status"], "no_sync_needed");
        assert_eq!(json["direction"], "github_to_azure");
        assert_eq!(json["entity"]["entity_id"], "42");
        assert!(json.get("error").is_none());
    }
}
