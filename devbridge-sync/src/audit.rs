//! Append-only audit trail of conflict resolutions.
//!
//! One JSON object per line at `<home>/.devbridge/audit/conflicts.jsonl`.
//! Nothing reads it back for correctness.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devbridge_core::{config, EntityRef, Platform};

use crate::error::{io_err, SyncError};
use crate::report::ResolveStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity: EntityRef,
    pub chosen_source: Platform,
    pub timestamp: DateTime<Utc>,
    pub outcome: ResolveStatus,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn at(home: &Path) -> Self {
        Self {
            path: config::root_at(home).join("audit").join("conflicts.jsonl"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &ConflictRecord) -> Result<(), SyncError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| io_err(&self.path, e))
    }

    /// Every record in file order. Missing file reads as empty.
    pub fn read_all(&self) -> Result<Vec<ConflictRecord>, SyncError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SyncError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devbridge_core::EntityType;
    use tempfile::TempDir;

    #[test]
    fn append_then_read_in_order() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::at(tmp.path());
        assert!(log.read_all().unwrap().is_empty());

        for (id, outcome) in [("1", ResolveStatus::Resolved), ("2", ResolveStatus::Failed)] {
            log.append(&ConflictRecord {
                entity: EntityRef::new(EntityType::Issue, id),
                chosen_source: Platform::GitHub,
                timestamp: Utc::now(),
                outcome,
            })
            .unwrap();
        }

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity.entity_id(), "1");
        assert_eq!(records[1].outcome, ResolveStatus::Failed);
        assert!(log.path().ends_with("audit/conflicts.jsonl"));
    }
}
