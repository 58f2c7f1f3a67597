//! Sync ledger: last-synced hashes per entity, used to skip redundant syncs.
//!
//! Persists one `LedgerFile` JSON document per entity type at
//! `<home>/.devbridge/ledger/<entity_type>.json`.
//! Writes use the atomic `.tmp` + rename pattern.
//!
//! The ledger is a cache: losing it costs refetches, never correctness.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use devbridge_core::{config, EntityRef, EntityType};

use crate::error::{io_err, SyncError};

/// Content hashes of both sides of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPair {
    pub github: String,
    pub azure: String,
}

/// State recorded after the last successful sync of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub last_sync: DateTime<Utc>,
    pub github_hash: String,
    pub azure_hash: String,
}

impl LedgerEntry {
    /// Both live hashes equal the recorded ones.
    pub fn matches(&self, hashes: &HashPair) -> bool {
        self.github_hash == hashes.github && self.azure_hash == hashes.azure
    }
}

/// On-disk ledger payload for one entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerFile {
    pub entity_type: EntityType,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, LedgerEntry>,
}

impl LedgerFile {
    fn empty(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            updated_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

/// Path to the ledger JSON for `entity_type`, rooted at `home`.
///
/// `~/.devbridge/ledger/<entity_type>.json`
pub fn store_path_at(home: &Path, entity_type: EntityType) -> PathBuf {
    config::root_at(home)
        .join("ledger")
        .join(format!("{entity_type}.json"))
}

/// Load the ledger for `entity_type`.
///
/// Returns an empty ledger if the file does not yet exist.
pub fn load_at(home: &Path, entity_type: EntityType) -> Result<LedgerFile, SyncError> {
    let path = store_path_at(home, entity_type);
    if !path.exists() {
        return Ok(LedgerFile::empty(entity_type));
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save a ledger file atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_at(home: &Path, file: &LedgerFile) -> Result<(), SyncError> {
    let path = store_path_at(home, file.entity_type);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid ledger path")));
    };

    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Ledger owned by one orchestrator. File-backed or purely in memory.
///
/// Clones share one cache. The mutex guards plain memory plus, for a
/// persistent ledger, one small file write; async callers go through
/// [`Ledger::offload`] so that write never runs on a runtime worker.
#[derive(Debug, Clone)]
pub struct Ledger {
    home: Option<PathBuf>,
    files: Arc<Mutex<HashMap<EntityType, LedgerFile>>>,
}

impl Ledger {
    /// A ledger that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            home: None,
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A ledger persisted under `<home>/.devbridge/ledger/`. Files load lazily.
    pub fn open(home: &Path) -> Self {
        Self {
            home: Some(home.to_path_buf()),
            files: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.home.is_some()
    }

    pub fn get(&self, entity: &EntityRef) -> Result<Option<LedgerEntry>, SyncError> {
        self.with_file(entity.entity_type(), |file| {
            Ok(file.entries.get(entity.entity_id()).cloned())
        })
    }

    pub fn get_last_sync(&self, entity: &EntityRef) -> Result<Option<DateTime<Utc>>, SyncError> {
        Ok(self.get(entity)?.map(|entry| entry.last_sync))
    }

    /// Run `f` against this ledger from async code.
    ///
    /// Persistent ledgers run it on the blocking pool; in-memory ones inline.
    pub async fn offload<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T, SyncError> + Send + 'static,
    {
        if !self.is_persistent() {
            return f(self);
        }
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || f(&ledger))
            .await
            .map_err(|err| io_err("ledger", std::io::Error::other(err)))?
    }

    /// Record a successful sync.
    ///
    /// `timestamp` is clamped so `last_sync` never moves backwards. The
    /// cached entry changes only once the file write has succeeded.
    pub fn update(
        &self,
        entity: &EntityRef,
        hashes: &HashPair,
        timestamp: DateTime<Utc>,
    ) -> Result<LedgerEntry, SyncError> {
        let home = self.home.clone();
        self.with_file(entity.entity_type(), |cached| {
            let mut file = cached.clone();
            let last_sync = match file.entries.get(entity.entity_id()) {
                Some(previous) if previous.last_sync > timestamp => previous.last_sync,
                _ => timestamp,
            };
            let entry = LedgerEntry {
                last_sync,
                github_hash: hashes.github.clone(),
                azure_hash: hashes.azure.clone(),
            };
            file.entries
                .insert(entity.entity_id().to_string(), entry.clone());
            file.updated_at = file.updated_at.max(last_sync);
            if let Some(home) = &home {
                save_at(home, &file)?;
            }
            *cached = file;
            Ok(entry)
        })
    }

    /// Forget an entity. Used only on explicit entity removal.
    pub fn remove(&self, entity: &EntityRef) -> Result<Option<LedgerEntry>, SyncError> {
        let home = self.home.clone();
        self.with_file(entity.entity_type(), |cached| {
            if !cached.entries.contains_key(entity.entity_id()) {
                return Ok(None);
            }
            let mut file = cached.clone();
            let removed = file.entries.remove(entity.entity_id());
            if let Some(home) = &home {
                save_at(home, &file)?;
            }
            *cached = file;
            Ok(removed)
        })
    }

    /// All entries of one entity type, sorted by id.
    pub fn entries(&self, entity_type: EntityType) -> Result<Vec<(String, LedgerEntry)>, SyncError> {
        self.with_file(entity_type, |file| {
            Ok(file
                .entries
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect())
        })
    }

    fn with_file<T>(
        &self,
        entity_type: EntityType,
        f: impl FnOnce(&mut LedgerFile) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut files = self.files.lock().unwrap_or_else(|p| p.into_inner());
        if !files.contains_key(&entity_type) {
            let file = match &self.home {
                Some(home) => load_at(home, entity_type)?,
                None => LedgerFile::empty(entity_type),
            };
            files.insert(entity_type, file);
        }
        let file = files
            .get_mut(&entity_type)
            .ok_or_else(|| io_err("ledger", std::io::Error::other("ledger file vanished")))?;
        f(file)
    }
}
