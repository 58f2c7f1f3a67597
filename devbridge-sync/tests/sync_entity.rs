use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use devbridge_core::{EntityRef, EntityType, Platform, Snapshot, SyncDirection};
use devbridge_sync::{
    AuditLog, CancellationToken, Ledger, ListFilter, MemoryAdapter, Operation, PlatformAdapter,
    PlatformError, Resolution, ResolveStatus, RetryPolicy, SyncError, SyncOrchestrator,
    SyncStatus,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn issue(title: &str, state: &str) -> Snapshot {
    Snapshot::from_fields(
        EntityType::Issue,
        [("title", json!(title)), ("state", json!(state))],
    )
}

fn at_minute(snapshot: Snapshot, minute: u32) -> Snapshot {
    snapshot.with_modified_at(Some(
        Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
    ))
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

fn orchestrator(
    github: &Arc<MemoryAdapter>,
    azure: &Arc<MemoryAdapter>,
    ledger: Ledger,
) -> SyncOrchestrator {
    // RUST_LOG=devbridge_sync=debug shows lock and retry decisions.
    let _ = env_logger::builder().is_test(true).try_init();
    SyncOrchestrator::new(github.clone(), azure.clone(), ledger).with_retry(fast_retry())
}

/// GitHub issue #42 `{Bug, open}` against Azure `{Bug (old), open}`.
fn issue_42() -> (Arc<MemoryAdapter>, Arc<MemoryAdapter>) {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("42", issue("Bug", "open"));
    azure.insert("42", issue("Bug (old)", "open"));
    (github, azure)
}

fn entity_42() -> EntityRef {
    EntityRef::new(EntityType::Issue, "42")
}

#[tokio::test]
async fn github_to_azure_overwrites_title_and_verifies_clean() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();

    let outcome = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(outcome.written_to, Some(Platform::Azure));
    assert_eq!(outcome.differences.len(), 1);
    assert_eq!(outcome.differences[0].field, "title");
    assert_eq!(outcome.differences[0].left, json!("Bug"));

    let stored = azure.get(&entity_42()).expect("azure 42");
    assert_eq!(stored.get("title"), Some(&json!("Bug")));

    let verify = orch.verify_sync(EntityType::Issue, "42").await.expect("verify");
    assert!(verify.is_synced);
    assert!(verify.differences.is_empty());
    assert_eq!(verify.github_hash, verify.azure_hash);
    assert!(verify.last_sync.is_some());
}

#[tokio::test]
async fn second_sync_is_a_no_op() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();

    orch.sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("first sync");
    let second = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("second sync");

    assert_eq!(second.status, SyncStatus::NoSyncNeeded);
    assert_eq!(azure.write_count(), 1);
    assert_eq!(github.write_count(), 0);
}

#[tokio::test]
async fn equal_sides_record_ledger_without_writing() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("7", issue("Same", "open"));
    azure.insert("7", issue("Same", "open"));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "7",
            SyncDirection::AzureToGithub,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::NoSyncNeeded);
    assert_eq!(github.write_count() + azure.write_count(), 0);
    assert!(orch
        .ledger()
        .get(&EntityRef::new(EntityType::Issue, "7"))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn persisted_ledger_skips_work_after_restart() {
    let home = TempDir::new().expect("home");
    let (github, azure) = issue_42();
    let cancel = CancellationToken::new();

    orchestrator(&github, &azure, Ledger::open(home.path()))
        .sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("first sync");

    let restarted = orchestrator(&github, &azure, Ledger::open(home.path()));
    let outcome = restarted
        .sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("second sync");
    assert_eq!(outcome.status, SyncStatus::NoSyncNeeded);
    assert_eq!(azure.write_count(), 1);
}

#[tokio::test]
async fn missing_entity_fails_with_not_found() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("9", issue("Only here", "open"));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let err = orch
        .sync_entity(
            EntityType::Issue,
            "9",
            SyncDirection::GithubToAzure,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.platform_error(), Some(&PlatformError::NotFound));
    assert!(!err.is_fatal_for_batch());
    assert!(orch.ledger().get(&EntityRef::new(EntityType::Issue, "9")).unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn concurrent_syncs_of_one_entity_do_not_interleave() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let github = Arc::new(
        MemoryAdapter::new(Platform::GitHub)
            .with_journal(journal.clone())
            .with_latency(Duration::from_millis(10)),
    );
    let azure = Arc::new(
        MemoryAdapter::new(Platform::Azure)
            .with_journal(journal.clone())
            .with_latency(Duration::from_millis(10)),
    );
    github.insert("42", issue("Bug", "open"));
    azure.insert("42", issue("Bug (old)", "open"));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        orch.sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel),
        orch.sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel),
    );
    assert_eq!(first.expect("first").status, SyncStatus::Synced);
    assert_eq!(second.expect("second").status, SyncStatus::NoSyncNeeded);

    let journal = journal.lock().unwrap().clone();
    // First sync: two fetches, the write, a confirming fetch. Second: two fetches.
    assert_eq!(journal.len(), 6, "journal: {journal:?}");
    assert_eq!(journal[2], "azure write issue/42");
    assert!(journal[3..].iter().all(|line| line.contains("fetch")));
    assert_eq!(azure.write_count(), 1);
}

#[tokio::test]
async fn cancelled_before_start_touches_nothing() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Cancelled { .. }), "got {err:?}");
    assert_eq!(github.fetch_count() + azure.fetch_count(), 0);
    assert_eq!(azure.write_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_fetch_prevents_write() {
    let github = Arc::new(
        MemoryAdapter::new(Platform::GitHub).with_latency(Duration::from_millis(10)),
    );
    let azure = Arc::new(
        MemoryAdapter::new(Platform::Azure).with_latency(Duration::from_millis(10)),
    );
    github.insert("42", issue("Bug", "open"));
    azure.insert("42", issue("Bug (old)", "open"));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();

    let (result, ()) = tokio::join!(
        orch.sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            cancel.cancel();
        },
    );
    assert!(matches!(result, Err(SyncError::Cancelled { .. })));
    assert_eq!(azure.write_count(), 0);
    assert_eq!(
        azure.get(&entity_42()).unwrap().get("title"),
        Some(&json!("Bug (old)"))
    );
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}

#[tokio::test]
async fn write_conflict_is_retried_once() {
    let (github, azure) = issue_42();
    azure.fail_next(Operation::Write, PlatformError::WriteConflict("rev 3".into()));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::GithubToAzure,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync after refetch");
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(azure.write_count(), 1);
    assert_eq!(azure.fetch_count(), 3);
}

#[tokio::test]
async fn second_write_conflict_fails() {
    let (github, azure) = issue_42();
    azure.fail_next(Operation::Write, PlatformError::WriteConflict("rev 3".into()));
    azure.fail_next(Operation::Write, PlatformError::WriteConflict("rev 4".into()));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let err = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::GithubToAzure,
            false,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err.platform_error(),
        Some(PlatformError::WriteConflict(_))
    ));
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}

#[tokio::test]
async fn transient_fetch_errors_are_retried() {
    let (github, azure) = issue_42();
    github.fail_next(Operation::Fetch, PlatformError::Transport("reset".into()));
    github.fail_next(
        Operation::Fetch,
        PlatformError::RateLimited {
            retry_after: Some(Duration::from_millis(1)),
        },
    );
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::GithubToAzure,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(github.fetch_count(), 3);
}

#[tokio::test]
async fn bidirectional_without_ledger_prefers_newer_side() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("42", at_minute(issue("Bug", "open"), 1));
    azure.insert("42", at_minute(issue("Bug, triaged", "active"), 20));
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::Bidirectional,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(outcome.direction, SyncDirection::AzureToGithub);
    assert_eq!(outcome.written_to, Some(Platform::GitHub));
    assert_eq!(
        github.get(&entity_42()).unwrap().get("state"),
        Some(&json!("active"))
    );
}

#[tokio::test]
async fn bidirectional_with_ledger_prefers_the_side_that_moved() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    let cancel = CancellationToken::new();
    orch.sync_entity(EntityType::Issue, "42", SyncDirection::GithubToAzure, false, &cancel)
        .await
        .expect("baseline");

    // Only Azure changes. GitHub keeps an artificially newer timestamp.
    azure.insert("42", at_minute(issue("Bug", "closed"), 1));
    github.insert("42", at_minute(issue("Bug", "open"), 50));

    let outcome = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::Bidirectional, false, &cancel)
        .await
        .expect("sync");
    assert_eq!(outcome.written_to, Some(Platform::GitHub));
    assert_eq!(
        github.get(&entity_42()).unwrap().get("state"),
        Some(&json!("closed"))
    );
}

#[tokio::test]
async fn bidirectional_without_timestamps_reports_conflict() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::Bidirectional,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Conflict);
    assert_eq!(outcome.written_to, None);
    assert_eq!(outcome.differences.len(), 1);
    assert_eq!(github.write_count() + azure.write_count(), 0);
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}

#[tokio::test]
async fn resolve_conflict_forces_chosen_side_and_audits() {
    let home = TempDir::new().expect("home");
    let (github, azure) = issue_42();
    let audit = AuditLog::at(home.path());
    let orch = orchestrator(&github, &azure, Ledger::in_memory()).with_audit_log(audit.clone());
    let cancel = CancellationToken::new();

    let report = orch
        .resolve_conflict(
            EntityType::Issue,
            "42",
            Resolution {
                source: Platform::Azure,
            },
            &cancel,
        )
        .await
        .expect("resolve");
    assert_eq!(report.status, ResolveStatus::Resolved);
    assert!(!report.before.is_synced);
    assert!(report.after.as_ref().expect("after").is_synced);
    assert_eq!(
        github.get(&entity_42()).unwrap().get("title"),
        Some(&json!("Bug (old)"))
    );

    let records = audit.read_all().expect("audit");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].chosen_source, Platform::Azure);
    assert_eq!(records[0].outcome, ResolveStatus::Resolved);

    let again = orch
        .resolve_conflict(
            EntityType::Issue,
            "42",
            Resolution {
                source: Platform::GitHub,
            },
            &cancel,
        )
        .await
        .expect("resolve again");
    assert_eq!(again.status, ResolveStatus::NoConflict);
    assert!(again.sync.is_none());
    assert_eq!(audit.read_all().unwrap().len(), 1);
}

#[tokio::test]
async fn verify_is_read_only() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());

    let report = orch.verify_sync(EntityType::Issue, "42").await.expect("verify");
    assert!(!report.is_synced);
    assert_eq!(report.differences[0].left, json!("Bug"));
    assert_eq!(report.differences[0].right, json!("Bug (old)"));
    assert!(report.last_sync.is_none());
    assert_eq!(github.write_count() + azure.write_count(), 0);
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}

#[tokio::test]
async fn forget_drops_ledger_entry() {
    let (github, azure) = issue_42();
    let orch = orchestrator(&github, &azure, Ledger::in_memory());
    orch.sync_entity(
        EntityType::Issue,
        "42",
        SyncDirection::GithubToAzure,
        false,
        &CancellationToken::new(),
    )
    .await
    .expect("sync");

    assert!(orch.forget(EntityType::Issue, "42").unwrap().is_some());
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}

/// Keeps only the first assignee on write, like an Azure work item.
struct FirstAssigneeOnly(Arc<MemoryAdapter>);

#[async_trait]
impl PlatformAdapter for FirstAssigneeOnly {
    fn platform(&self) -> Platform {
        self.0.platform()
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError> {
        self.0.fetch(entity_type, id).await
    }

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError> {
        self.0.list(entity_type, filter).await
    }

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        let mut kept = snapshot.clone();
        if let Some(Value::Array(assignees)) = kept.fields.get_mut("assignees") {
            assignees.truncate(1);
        }
        self.0.write(entity_type, id, &kept).await
    }
}

/// Rejects the first write after an edit of its own lands with a newer timestamp.
struct EditedDuringWrite {
    inner: Arc<MemoryAdapter>,
    edit: Mutex<Option<Snapshot>>,
}

#[async_trait]
impl PlatformAdapter for EditedDuringWrite {
    fn platform(&self) -> Platform {
        self.inner.platform()
    }

    async fn fetch(&self, entity_type: EntityType, id: &str) -> Result<Snapshot, PlatformError> {
        self.inner.fetch(entity_type, id).await
    }

    async fn list(
        &self,
        entity_type: EntityType,
        filter: &ListFilter,
    ) -> Result<Vec<String>, PlatformError> {
        self.inner.list(entity_type, filter).await
    }

    async fn write(
        &self,
        entity_type: EntityType,
        id: &str,
        snapshot: &Snapshot,
    ) -> Result<(), PlatformError> {
        let edit = self.edit.lock().unwrap().take();
        if let Some(edit) = edit {
            self.inner.insert(id, edit);
            return Err(PlatformError::WriteConflict("rev 4".into()));
        }
        self.inner.write(entity_type, id, snapshot).await
    }
}

fn assigned(title: &str, assignees: Value) -> Snapshot {
    Snapshot::from_fields(
        EntityType::Issue,
        [
            ("title", json!(title)),
            ("state", json!("open")),
            ("assignees", assignees),
        ],
    )
}

#[tokio::test]
async fn lossy_target_is_not_mistaken_for_an_edit() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("42", at_minute(assigned("Bug", json!(["ann", "bob"])), 30));
    azure.insert("42", at_minute(assigned("Bug (old)", json!(["ann"])), 1));
    let orch = SyncOrchestrator::new(
        github.clone(),
        Arc::new(FirstAssigneeOnly(azure.clone())),
        Ledger::in_memory(),
    )
    .with_retry(fast_retry());
    let cancel = CancellationToken::new();

    let first = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::Bidirectional, false, &cancel)
        .await
        .expect("first sync");
    assert_eq!(first.written_to, Some(Platform::Azure));

    let entry = orch.ledger().get(&entity_42()).unwrap().expect("ledger entry");
    assert_ne!(entry.github_hash, entry.azure_hash);

    let second = orch
        .sync_entity(EntityType::Issue, "42", SyncDirection::Bidirectional, false, &cancel)
        .await
        .expect("second sync");
    assert_eq!(second.status, SyncStatus::NoSyncNeeded);
    assert_eq!(github.write_count(), 0);
    assert_eq!(
        github.get(&entity_42()).unwrap().get("assignees"),
        Some(&json!(["ann", "bob"]))
    );
}

#[tokio::test]
async fn write_conflict_re_picks_the_bidirectional_winner() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("42", at_minute(issue("Bug", "open"), 30));
    azure.insert("42", at_minute(issue("Bug (old)", "open"), 1));
    let racing = EditedDuringWrite {
        inner: azure.clone(),
        edit: Mutex::new(Some(at_minute(issue("Bug, triaged", "active"), 59))),
    };
    let orch = SyncOrchestrator::new(github.clone(), Arc::new(racing), Ledger::in_memory())
        .with_retry(fast_retry());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::Bidirectional,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Synced);
    assert_eq!(outcome.written_to, Some(Platform::GitHub));
    assert_eq!(azure.write_count(), 0);
    assert_eq!(
        github.get(&entity_42()).unwrap().get("title"),
        Some(&json!("Bug, triaged"))
    );
    assert_eq!(
        azure.get(&entity_42()).unwrap().get("state"),
        Some(&json!("active"))
    );
}

#[tokio::test]
async fn write_conflict_with_undecidable_refetch_reports_conflict() {
    let github = Arc::new(MemoryAdapter::new(Platform::GitHub));
    let azure = Arc::new(MemoryAdapter::new(Platform::Azure));
    github.insert("42", at_minute(issue("Bug", "open"), 30));
    azure.insert("42", at_minute(issue("Bug (old)", "open"), 1));
    let racing = EditedDuringWrite {
        inner: azure.clone(),
        edit: Mutex::new(Some(at_minute(issue("Bug, triaged", "open"), 30))),
    };
    let orch = SyncOrchestrator::new(github.clone(), Arc::new(racing), Ledger::in_memory())
        .with_retry(fast_retry());

    let outcome = orch
        .sync_entity(
            EntityType::Issue,
            "42",
            SyncDirection::Bidirectional,
            false,
            &CancellationToken::new(),
        )
        .await
        .expect("sync");
    assert_eq!(outcome.status, SyncStatus::Conflict);
    assert_eq!(github.write_count() + azure.write_count(), 0);
    assert!(orch.ledger().get(&entity_42()).unwrap().is_none());
}
