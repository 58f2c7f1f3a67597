//! In-memory [`PlatformAdapter`] and the JSON fixture format that seeds it.
//!
//! Backs the test suites and the CLI's `--offline` mode.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use devbridge_core::{EntityRef, EntityType, Platform, Snapshot};

use crate::error::{io_err, SyncError};
use crate::platform::{ListFilter, PlatformAdapter, PlatformError};

/// Adapter call kind, for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    List,
    Write,
}

#[derive(Debug)]
struct InjectedFailure {
    entity: Option<EntityRef>,
    operation: Operation,
    error: PlatformError,
}

/// Shared, ordered record of adapter calls across adapters.
pub type Journal = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
pub struct MemoryAdapter {
    platform: Platform,
    entities: Mutex<BTreeMap<EntityRef, Snapshot>>,
    failures: Mutex<Vec<InjectedFailure>>,
    fetches: AtomicUsize,
    writes: AtomicUsize,
    journal: Option<Journal>,
    latency: Option<Duration>,
}

impl MemoryAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            entities: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            journal: None,
            latency: None,
        }
    }

    /// Record `"<platform> <op> <type>/<id>"` for every call.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Sleep before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, id: impl Into<String>, snapshot: Snapshot) {
        let entity = EntityRef::new(snapshot.entity_type, id);
        self.entities().insert(entity, snapshot);
    }

    pub fn get(&self, entity: &EntityRef) -> Option<Snapshot> {
        self.entities().get(entity).cloned()
    }

    pub fn remove(&self, entity: &EntityRef) -> Option<Snapshot> {
        self.entities().remove(entity)
    }

    /// Fail the next call of `operation` on any entity.
    pub fn fail_next(&self, operation: Operation, error: PlatformError) {
        self.push_failure(None, operation, error);
    }

    /// Fail the next call of `operation` on `entity` only.
    pub fn fail_on(&self, entity: &EntityRef, operation: Operation, error: PlatformError) {
        self.push_failure(Some(entity.clone()), operation, error);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current contents in fixture form.
    pub fn export(&self) -> FixtureSide {
        let mut side = FixtureSide::new();
        for (entity, snapshot) in self.entities().iter() {
            side.entry(entity.entity_type())
                .or_default()
                .insert(entity.entity_id().to_string(), FixtureEntity::from(snapshot));
        }
        side
    }

    fn entities(&self) -> std::sync::MutexGuard<'_, BTreeMap<EntityRef, Snapshot>> {
        self.entities.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push_failure(&self, entity: Option<EntityRef>, operation: Operation, error: PlatformError) {
        self.failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(InjectedFailure {
                entity,
                operation,
                error,
            });
    }

    fn take_failure(&self, operation: Operation, entity: Option<&EntityRef>) -> Option<PlatformError> {
        let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
        let index = failures.iter().position(|f| {
            f.operation == operation
                && match (&f.entity, entity) {
                    (None, _) => true,
                    (Some(wanted), Some(actual)) => wanted == actual,
                    (Some(_), None) => false,
                }
        })?;
        Some(failures.remove(index).error)
    }

    async fn enter(&self, operation: &str, target: &str) {
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(format!("{} {operation} {target}", self.platform));
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl PlatformAdapter for MemoryAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError> {
        let entity = EntityRef::new(entity_type, id);
        self.enter("fetch", &entity.to_string()).await;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.take_failure(Operation::Fetch, Some(&entity)) {
            return Err(err);
        }
        self.get(&entity).ok_or(PlatformError::NotFound)
    }

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError> {
        self.enter("list", entity_type.as_str()).await;
        if let Some(err) = self.take_failure(Operation::List, None) {
            return Err(err);
        }
        Ok(self
            .entities()
            .iter()
            .filter(|(entity, snapshot)| {
                entity.entity_type() == entity_type && matches_filter(snapshot, filter)
            })
            .map(|(entity, _)| entity.entity_id().to_string())
            .collect())
    }

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        let entity = EntityRef::new(entity_type, id);
        self.enter("write", &entity.to_string()).await;
        if let Some(err) = self.take_failure(Operation::Write, Some(&entity)) {
            return Err(err);
        }
        let mut entities = self.entities();
        let Some(existing) = entities.get_mut(&entity) else {
            return Err(PlatformError::NotFound);
        };
        existing.fields = snapshot.fields.clone();
        existing.modified_at = Some(Utc::now());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Filters compare against comparable fields only; unknown keys never match.
fn matches_filter(snapshot: &Snapshot, filter: &ListFilter) -> bool {
    filter.iter().all(|(key, wanted)| match snapshot.get(key) {
        Some(Value::String(s)) => s == wanted,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == *wanted,
    })
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One entity in a fixture: its fields plus an optional `modified_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl From<&Snapshot> for FixtureEntity {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            modified_at: snapshot.modified_at,
            fields: snapshot.fields.clone(),
        }
    }
}

impl FixtureEntity {
    fn into_snapshot(self, entity_type: EntityType) -> Snapshot {
        Snapshot::from_fields(entity_type, self.fields).with_modified_at(self.modified_at)
    }
}

/// `{ entity_type: { id: entity } }` for one platform.
pub type FixtureSide = BTreeMap<EntityType, BTreeMap<String, FixtureEntity>>;

/// Offline state of both platforms.
///
/// ```json
/// { "github": { "issue": { "42": { "title": "Bug", "state": "open" } } },
///   "azure":  { "issue": { "42": { "title": "Bug (old)", "state": "open" } } } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub github: FixtureSide,
    #[serde(default)]
    pub azure: FixtureSide,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write atomically via `<path>.tmp`.
    pub fn save(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| io_err(path, e))
    }

    /// Build `(github, azure)` adapters seeded with this fixture.
    pub fn adapters(&self) -> (MemoryAdapter, MemoryAdapter) {
        (
            seeded(Platform::GitHub, &self.github),
            seeded(Platform::Azure, &self.azure),
        )
    }

    pub fn from_adapters(github: &MemoryAdapter, azure: &MemoryAdapter) -> Self {
        Self {
            github: github.export(),
            azure: azure.export(),
        }
    }
}

fn seeded(platform: Platform, side: &FixtureSide) -> MemoryAdapter {
    let adapter = MemoryAdapter::new(platform);
    for (entity_type, entities) in side {
        for (id, entity) in entities {
            adapter.insert(id.clone(), entity.clone().into_snapshot(*entity_type));
        }
    }
    adapter
}
