//! Drives single-entity sync, bulk sync, verification, and conflict resolution.
//!
//! Per attempt: lock → fetch both sides → decide → (write → refetch target →
//! ledger) → release.
//! The lock guard is dropped on every exit path. The ledger only changes
//! after a successful remote write, or to record that both sides already
//! agree.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use devbridge_core::{EntityRef, EntityType, Platform, Snapshot, SyncDirection, SyncSettings};

use crate::audit::{AuditLog, ConflictRecord};
use crate::comparator;
use crate::error::{platform_err, SyncError};
use crate::ledger::{HashPair, Ledger, LedgerEntry};
use crate::locks::LockTable;
use crate::platform::{ListFilter, PlatformAdapter, PlatformError};
use crate::report::{
    BulkSyncReport, Resolution, ResolveReport, ResolveStatus, SyncOutcome, SyncStatus,
    VerifyReport,
};
use crate::retry::RetryPolicy;

/// Owns both adapters, the lock table and the ledger. One per process.
pub struct SyncOrchestrator {
    github: Arc<dyn PlatformAdapter>,
    azure: Arc<dyn PlatformAdapter>,
    locks: LockTable,
    ledger: Ledger,
    retry: RetryPolicy,
    lock_timeout: Option<Duration>,
    concurrency: usize,
    audit: Option<AuditLog>,
}

/// Live state of both sides after a fetch.
struct Fetched {
    github: Snapshot,
    azure: Snapshot,
    hashes: HashPair,
}

impl Fetched {
    fn new(github: Snapshot, azure: Snapshot) -> Self {
        let hashes = HashPair {
            github: comparator::hash(&github),
            azure: comparator::hash(&azure),
        };
        Self {
            github,
            azure,
            hashes,
        }
    }

    fn side(&self, platform: Platform) -> &Snapshot {
        match platform {
            Platform::GitHub => &self.github,
            Platform::Azure => &self.azure,
        }
    }

    fn is_synced(&self) -> bool {
        comparator::is_synced(&self.github, &self.azure)
    }
}

impl SyncOrchestrator {
    pub fn new(
        github: Arc<dyn PlatformAdapter>,
        azure: Arc<dyn PlatformAdapter>,
        ledger: Ledger,
    ) -> Self {
        Self {
            github,
            azure,
            locks: LockTable::new(),
            ledger,
            retry: RetryPolicy::default(),
            lock_timeout: None,
            concurrency: 1,
            audit: None,
        }
    }

    /// Apply retry, lock timeout and concurrency from configuration.
    pub fn from_settings(
        github: Arc<dyn PlatformAdapter>,
        azure: Arc<dyn PlatformAdapter>,
        ledger: Ledger,
        settings: &SyncSettings,
    ) -> Self {
        Self::new(github, azure, ledger)
            .with_retry(RetryPolicy::from(&settings.retry))
            .with_lock_timeout(settings.lock_timeout())
            .with_concurrency(settings.concurrency)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Entities processed at once by `bulk_sync`. Zero is treated as one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    // -----------------------------------------------------------------------
    // sync_entity
    // -----------------------------------------------------------------------

    /// Sync one entity in `direction`.
    ///
    /// With `force = false`, an entity whose live hashes match the ledger is
    /// reported `NoSyncNeeded` without writing. Cancellation is honored while
    /// waiting for the lock, after fetching and right before the write.
    pub async fn sync_entity(
        &self,
        entity_type: EntityType,
        id: &str,
        direction: SyncDirection,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, SyncError> {
        let entity = EntityRef::new(entity_type, id);

        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled { entity: entity.clone() }),
            guard = self.locks.acquire_timeout(&entity, self.lock_timeout) => guard?,
        };
        tracing::debug!("lock acquired for {entity}");

        let mut fetched = self.fetch_both(&entity).await?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled { entity });
        }

        let prior = self.ledger_entry(&entity).await;
        if !force {
            if let Some(entry) = &prior {
                if entry.matches(&fetched.hashes) {
                    tracing::debug!("{entity} unchanged since last sync");
                    return Ok(SyncOutcome::new(entity, SyncStatus::NoSyncNeeded, direction));
                }
            }
        }
        if fetched.is_synced() {
            self.record(&entity, &fetched.hashes).await;
            return Ok(SyncOutcome::new(entity, SyncStatus::NoSyncNeeded, direction));
        }

        let Some(mut source) = choose_source(direction, prior.as_ref(), &fetched) else {
            return Ok(undecidable(entity, &fetched));
        };

        let mut conflict_retry = true;
        loop {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled { entity });
            }
            let target = source.other();
            match self.write(target, &entity, fetched.side(source)).await {
                Ok(()) => break,
                Err(PlatformError::WriteConflict(reason)) if conflict_retry => {
                    tracing::warn!("{target} rejected write to {entity} ({reason}); refetching once");
                    conflict_retry = false;
                    fetched = self.fetch_both(&entity).await?;
                    let unchanged = prior.as_ref().is_some_and(|e| e.matches(&fetched.hashes));
                    if !force && unchanged {
                        return Ok(SyncOutcome::new(entity, SyncStatus::NoSyncNeeded, direction));
                    }
                    if fetched.is_synced() {
                        self.record(&entity, &fetched.hashes).await;
                        return Ok(SyncOutcome::new(entity, SyncStatus::NoSyncNeeded, direction));
                    }
                    // The rejected write may have raced an edit that changes the winner.
                    match choose_source(direction, prior.as_ref(), &fetched) {
                        Some(winner) => {
                            if winner != source {
                                tracing::warn!("{entity} changed during sync; {winner} now wins");
                            }
                            source = winner;
                        }
                        None => return Ok(undecidable(entity, &fetched)),
                    }
                }
                Err(err) => {
                    tracing::error!("sync of {entity} failed writing to {target}: {err}");
                    return Err(platform_err(target, "write", &entity, err));
                }
            }
        }

        let target = source.other();
        let differences = comparator::diff(fetched.side(source), fetched.side(target));

        // Adapters may drop fields on write, so record what the target really holds.
        match self.fetch(target, &entity).await {
            Ok(written) => {
                let source_hash = comparator::hash(fetched.side(source));
                let target_hash = comparator::hash(&written);
                if target_hash != source_hash {
                    tracing::debug!("{target} kept a lossy copy of {entity}");
                }
                let hashes = match source {
                    Platform::GitHub => HashPair {
                        github: source_hash,
                        azure: target_hash,
                    },
                    Platform::Azure => HashPair {
                        github: target_hash,
                        azure: source_hash,
                    },
                };
                self.record(&entity, &hashes).await;
            }
            Err(err) => {
                tracing::warn!("not recording {entity} in ledger; confirming the write failed: {err}");
            }
        }
        tracing::info!(
            "synced {entity} {source} -> {target} ({} field(s))",
            differences.len()
        );

        let mut outcome = SyncOutcome::new(entity, SyncStatus::Synced, SyncDirection::from_source(source));
        outcome.written_to = Some(target);
        outcome.differences = differences;
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // bulk_sync
    // -----------------------------------------------------------------------

    /// Sync every entity of `entity_type` the source side lists.
    ///
    /// Individual failures are recorded and the batch continues. An auth
    /// failure or cancellation stops scheduling; entities not yet started
    /// are reported failed.
    pub async fn bulk_sync(
        &self,
        entity_type: EntityType,
        direction: SyncDirection,
        filter: &ListFilter,
        cancel: &CancellationToken,
    ) -> Result<BulkSyncReport, SyncError> {
        let start_time = Utc::now();
        let ids = self.enumerate(entity_type, direction, filter).await?;
        tracing::info!(
            "bulk sync of {} {entity_type} entities ({direction}, concurrency {})",
            ids.len(),
            self.concurrency
        );

        let abort_cell: OnceLock<String> = OnceLock::new();
        let abort = &abort_cell;
        let results: Vec<SyncOutcome> = stream::iter(ids)
            .map(|id| async move {
                let entity = EntityRef::new(entity_type, id.as_str());
                if let Some(reason) = abort.get() {
                    return SyncOutcome::failed(entity, direction, format!("aborted: {reason}"));
                }
                if cancel.is_cancelled() {
                    return SyncOutcome::failed(entity, direction, "cancelled");
                }
                match self.sync_entity(entity_type, &id, direction, false, cancel).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        if err.is_fatal_for_batch() {
                            tracing::error!("aborting bulk sync: {err}");
                            let _ = abort.set(err.to_string());
                        } else {
                            tracing::warn!("{entity} failed: {err}");
                        }
                        SyncOutcome::from_error(entity, direction, &err)
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let aborted = abort_cell
            .into_inner()
            .or_else(|| cancel.is_cancelled().then(|| "cancelled".to_string()));
        let report = BulkSyncReport::tally(entity_type, direction, start_time, results, aborted);
        tracing::info!(
            "bulk sync of {entity_type}: {} synced, {} skipped, {} conflicts, {} failed",
            report.successful,
            report.skipped,
            report.conflicts,
            report.failed
        );
        Ok(report)
    }

    /// Ids from the source side; the sorted union of both for bidirectional.
    async fn enumerate(
        &self,
        entity_type: EntityType,
        direction: SyncDirection,
        filter: &ListFilter,
    ) -> Result<Vec<String>, SyncError> {
        match direction.source() {
            Some(source) => self.list(source, entity_type, filter).await,
            None => {
                let (github, azure) = tokio::join!(
                    self.list(Platform::GitHub, entity_type, filter),
                    self.list(Platform::Azure, entity_type, filter),
                );
                let union: BTreeSet<String> = github?.into_iter().chain(azure?).collect();
                Ok(union.into_iter().collect())
            }
        }
    }

    // -----------------------------------------------------------------------
    // verify_sync / resolve_conflict
    // -----------------------------------------------------------------------

    /// Compare both sides without touching locks, the ledger or either platform.
    pub async fn verify_sync(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<VerifyReport, SyncError> {
        let entity = EntityRef::new(entity_type, id);
        let fetched = self.fetch_both(&entity).await?;
        let differences = comparator::diff(&fetched.github, &fetched.azure);
        let last_sync = self.ledger_entry(&entity).await.map(|entry| entry.last_sync);
        Ok(VerifyReport {
            is_synced: differences.is_empty(),
            github_hash: fetched.hashes.github,
            azure_hash: fetched.hashes.azure,
            differences,
            last_sync,
            verification_time: Utc::now(),
            entity,
        })
    }

    /// Force one side's content onto the other and confirm the result.
    pub async fn resolve_conflict(
        &self,
        entity_type: EntityType,
        id: &str,
        resolution: Resolution,
        cancel: &CancellationToken,
    ) -> Result<ResolveReport, SyncError> {
        let entity = EntityRef::new(entity_type, id);
        let before = self.verify_sync(entity_type, id).await?;
        if before.is_synced {
            return Ok(ResolveReport {
                entity,
                status: ResolveStatus::NoConflict,
                resolution,
                before,
                sync: None,
                after: None,
                timestamp: Utc::now(),
            });
        }

        let direction = SyncDirection::from_source(resolution.source);
        let result = match self.sync_entity(entity_type, id, direction, true, cancel).await {
            Ok(sync) => self
                .verify_sync(entity_type, id)
                .await
                .map(|after| (sync, after)),
            Err(err) => Err(err),
        };
        let (sync, after) = match result {
            Ok(pair) => pair,
            Err(err) => {
                self.audit(&entity, resolution.source, ResolveStatus::Failed);
                return Err(err);
            }
        };

        let status = if after.is_synced {
            ResolveStatus::Resolved
        } else {
            ResolveStatus::Failed
        };
        self.audit(&entity, resolution.source, status);
        tracing::info!("resolved {entity} from {}: {status}", resolution.source);
        Ok(ResolveReport {
            entity,
            status,
            resolution,
            before,
            sync: Some(sync),
            after: Some(after),
            timestamp: Utc::now(),
        })
    }

    /// Drop the ledger entry for an entity removed from both platforms.
    pub fn forget(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<LedgerEntry>, SyncError> {
        self.ledger.remove(&EntityRef::new(entity_type, id))
    }

    // -----------------------------------------------------------------------
    // Adapter calls, all through the retry policy
    // -----------------------------------------------------------------------

    fn adapter(&self, platform: Platform) -> &dyn PlatformAdapter {
        match platform {
            Platform::GitHub => self.github.as_ref(),
            Platform::Azure => self.azure.as_ref(),
        }
    }

    async fn fetch(&self, platform: Platform, entity: &EntityRef) -> Result<Snapshot, SyncError> {
        let adapter = self.adapter(platform);
        self.retry
            .run(&format!("{platform} fetch {entity}"), || {
                adapter.fetch(entity.entity_type(), entity.entity_id())
            })
            .await
            .map_err(|err| platform_err(platform, "fetch", entity, err))
    }

    async fn fetch_both(&self, entity: &EntityRef) -> Result<Fetched, SyncError> {
        let (github, azure) = tokio::join!(
            self.fetch(Platform::GitHub, entity),
            self.fetch(Platform::Azure, entity),
        );
        Ok(Fetched::new(github?, azure?))
    }

    async fn list(
        &self,
        platform: Platform,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, SyncError> {
        let adapter = self.adapter(platform);
        self.retry
            .run(&format!("{platform} list {entity_type}"), || {
                adapter.list(entity_type, filter)
            })
            .await
            .map_err(|err| platform_err(platform, "list", entity_type, err))
    }

    async fn write(
        &self,
        platform: Platform,
        entity: &EntityRef,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        let adapter = self.adapter(platform);
        self.retry
            .run(&format!("{platform} write {entity}"), || {
                adapter.write(entity.entity_type(), entity.entity_id(), snapshot)
            })
            .await
    }

    // -----------------------------------------------------------------------
    // Ledger and audit side effects
    // -----------------------------------------------------------------------

    /// Ledger read failures degrade to "no entry".
    async fn ledger_entry(&self, entity: &EntityRef) -> Option<LedgerEntry> {
        let key = entity.clone();
        match self.ledger.offload(move |ledger| ledger.get(&key)).await {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("ignoring unreadable ledger for {entity}: {err}");
                None
            }
        }
    }

    /// The remote write already happened; a ledger failure only costs a refetch later.
    async fn record(&self, entity: &EntityRef, hashes: &HashPair) {
        let (key, hashes) = (entity.clone(), hashes.clone());
        let update = move |ledger: &Ledger| ledger.update(&key, &hashes, Utc::now());
        if let Err(err) = self.ledger.offload(update).await {
            tracing::error!("failed to record sync of {entity} in ledger: {err}");
        }
    }

    fn audit(&self, entity: &EntityRef, chosen_source: Platform, outcome: ResolveStatus) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = ConflictRecord {
            entity: entity.clone(),
            chosen_source,
            timestamp: Utc::now(),
            outcome,
        };
        if let Err(err) = audit.append(&record) {
            tracing::warn!("failed to append audit record for {entity}: {err}");
        }
    }
}

/// The side to copy from, or `None` when a bidirectional sync is undecidable.
fn choose_source(
    direction: SyncDirection,
    prior: Option<&LedgerEntry>,
    fetched: &Fetched,
) -> Option<Platform> {
    direction.source().or_else(|| pick_winner(prior, fetched))
}

fn undecidable(entity: EntityRef, fetched: &Fetched) -> SyncOutcome {
    tracing::warn!(
        "bidirectional sync of {entity} is undecidable; both sides changed with no usable timestamps"
    );
    let mut outcome = SyncOutcome::new(entity, SyncStatus::Conflict, SyncDirection::Bidirectional);
    outcome.differences = comparator::diff(&fetched.github, &fetched.azure);
    outcome
}

/// Bidirectional tie-break.
///
/// 1. With a ledger entry, the only side whose hash moved wins.
/// 2. Otherwise the later `modified_at` wins.
/// 3. Missing or equal timestamps are undecidable.
fn pick_winner(prior: Option<&LedgerEntry>, fetched: &Fetched) -> Option<Platform> {
    if let Some(entry) = prior {
        let github_moved = entry.github_hash != fetched.hashes.github;
        let azure_moved = entry.azure_hash != fetched.hashes.azure;
        match (github_moved, azure_moved) {
            (true, false) => return Some(Platform::GitHub),
            (false, true) => return Some(Platform::Azure),
            _ => {}
        }
    }
    match (fetched.github.modified_at, fetched.azure.modified_at) {
        (Some(github), Some(azure)) if github > azure => Some(Platform::GitHub),
        (Some(github), Some(azure)) if azure > github => Some(Platform::Azure),
        _ => None,
    }
}
