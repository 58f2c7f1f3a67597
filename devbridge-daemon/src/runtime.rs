use std::collections::BTreeMap;
use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::MakeWriter;

use devbridge_core::{DaemonSettings, EntityType, Schedule, SyncDirection};
use devbridge_sync::{BulkSyncReport, SyncOrchestrator};

use crate::error::{io_err, DaemonError};
use crate::paths::{devbridge_root, log_path, logs_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};

/// What one sync job covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    /// Every configured schedule, in order.
    All,
    Schedule(Schedule),
}

impl SyncTarget {
    fn label(&self) -> String {
        match self {
            SyncTarget::All => "all".to_string(),
            SyncTarget::Schedule(schedule) => schedule.label(),
        }
    }
}

/// Result of one schedule's `bulk_sync` inside the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRun {
    pub schedule: String,
    /// `interval` or `socket`.
    pub source: String,
    pub finished_at_unix: u64,
    pub duration_ms: u64,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Set when the batch could not start, e.g. listing failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScheduleRun {
    fn from_result(
        schedule: String,
        source: &str,
        result: Result<BulkSyncReport, DaemonError>,
        elapsed: Duration,
    ) -> Self {
        let mut run = Self {
            schedule,
            source: source.to_string(),
            finished_at_unix: unix_seconds_now(),
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            total: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            conflicts: 0,
            aborted: None,
            error: None,
        };
        match result {
            Ok(report) => {
                run.total = report.total;
                run.successful = report.successful;
                run.failed = report.failed;
                run.skipped = report.skipped;
                run.conflicts = report.conflicts;
                run.aborted = report.aborted;
            }
            Err(err) => run.error = Some(err.to_string()),
        }
        run
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.aborted.is_none() && self.failed == 0
    }
}

/// Counts accumulated over every run since the daemon started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub runs: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
    /// Runs that errored before syncing or were aborted.
    pub interrupted: usize,
}

impl RunTotals {
    fn record(&mut self, run: &ScheduleRun) {
        self.runs += 1;
        self.successful += run.successful;
        self.failed += run.failed;
        self.skipped += run.skipped;
        self.conflicts += run.conflicts;
        if run.error.is_some() || run.aborted.is_some() {
            self.interrupted += 1;
        }
    }
}

#[derive(Debug, Clone, Default)]
struct DaemonStats {
    /// Latest run per schedule label.
    last_runs: BTreeMap<String, ScheduleRun>,
    totals: RunTotals,
}

struct SyncJob {
    target: SyncTarget,
    source: &'static str,
    respond_to: oneshot::Sender<Vec<ScheduleRun>>,
}

#[derive(Clone)]
struct SocketContext {
    home: PathBuf,
    settings: Arc<DaemonSettings>,
    stats: Arc<RwLock<DaemonStats>>,
    sync_tx: mpsc::Sender<SyncJob>,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    orchestrator: SyncOrchestrator,
    settings: DaemonSettings,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(home)?;
    init_tracing(home);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), Arc::new(orchestrator), settings))
}

/// Run the scheduler, sync processor, socket server and log rotation until
/// a `stop` request or ctrl-c.
pub async fn run(
    home: PathBuf,
    orchestrator: Arc<SyncOrchestrator>,
    settings: DaemonSettings,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let settings = Arc::new(settings);
    let stats = Arc::new(RwLock::new(DaemonStats::default()));
    let started_at_unix = unix_seconds_now();
    let cancel = CancellationToken::new();

    let (sync_tx, sync_rx) = mpsc::channel::<SyncJob>(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        home = %home.display(),
        schedules = settings.schedules.len(),
        interval_secs = settings.interval_secs,
        "devbridge daemon starting",
    );

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let sync_tx = sync_tx.clone();
        let interval_secs = settings.interval_secs;
        tokio::spawn(async move {
            let result = scheduler_task(interval_secs, sync_tx, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let processor_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let settings = settings.clone();
        let stats = stats.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result =
                sync_processor_task(orchestrator, settings, stats, cancel, sync_rx, shutdown_rx)
                    .await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let context = SocketContext {
            home: home.clone(),
            settings: settings.clone(),
            stats: stats.clone(),
            sync_tx,
            shutdown_tx: shutdown.clone(),
            started_at_unix,
        };
        tokio::spawn(async move {
            let result = socket_server_task(context, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let shutdown_rx = shutdown.subscribe();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received ctrl-c, shutting down daemon");
                        Ok(())
                    }
                    Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                },
            };
            let _ = shutdown.send(());
            // In-flight bulk syncs stop at their next checkpoint.
            cancel.cancel();
            result
        })
    };

    let (scheduler_result, processor_result, socket_result, rotation_result, signal_result) = tokio::join!(
        scheduler_handle,
        processor_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("sync_processor", processor_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("devbridge daemon stopped");
    Ok(())
}

/// Queue every schedule once per interval. The first tick fires immediately.
async fn scheduler_task(
    interval_secs: u64,
    sync_tx: mpsc::Sender<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match enqueue_sync(&sync_tx, SyncTarget::All, "interval").await {
                    Ok(runs) => tracing::debug!(schedules = runs.len(), "interval sync finished"),
                    Err(err) => tracing::warn!(error = %err, "interval sync was not run"),
                }
            }
        }
    }
    Ok(())
}

async fn sync_processor_task(
    orchestrator: Arc<SyncOrchestrator>,
    settings: Arc<DaemonSettings>,
    stats: Arc<RwLock<DaemonStats>>,
    cancel: CancellationToken,
    mut sync_rx: mpsc::Receiver<SyncJob>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            maybe_job = sync_rx.recv() => {
                let Some(job) = maybe_job else { break };
                let schedules = match &job.target {
                    SyncTarget::All => settings.schedules.clone(),
                    SyncTarget::Schedule(schedule) => vec![schedule.clone()],
                };
                tracing::debug!(target = %job.target.label(), source = job.source, "sync job started");

                let mut runs = Vec::with_capacity(schedules.len());
                for schedule in &schedules {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let run = run_schedule(&orchestrator, schedule, job.source, &cancel).await;
                    log_run(&run);
                    runs.push(run);
                }
                record_runs(&stats, &runs).await;
                let _ = job.respond_to.send(runs);
            }
        }
    }
    Ok(())
}

async fn run_schedule(
    orchestrator: &SyncOrchestrator,
    schedule: &Schedule,
    source: &str,
    cancel: &CancellationToken,
) -> ScheduleRun {
    let started = Instant::now();
    let result = orchestrator
        .bulk_sync(
            schedule.entity_type,
            schedule.direction,
            &schedule.filters,
            cancel,
        )
        .await
        .map_err(DaemonError::from);
    ScheduleRun::from_result(schedule.label(), source, result, started.elapsed())
}

fn log_run(run: &ScheduleRun) {
    if let Some(error) = &run.error {
        tracing::error!(schedule = %run.schedule, error = %error, "scheduled sync failed");
    } else if let Some(reason) = &run.aborted {
        tracing::warn!(
            schedule = %run.schedule,
            reason = %reason,
            total = run.total,
            failed = run.failed,
            "scheduled sync aborted",
        );
    } else {
        tracing::info!(
            schedule = %run.schedule,
            source = %run.source,
            total = run.total,
            successful = run.successful,
            skipped = run.skipped,
            conflicts = run.conflicts,
            failed = run.failed,
            duration_ms = run.duration_ms,
            "scheduled sync completed",
        );
    }
}

async fn record_runs(stats: &RwLock<DaemonStats>, runs: &[ScheduleRun]) {
    let mut stats = stats.write().await;
    for run in runs {
        stats.totals.record(run);
        stats.last_runs.insert(run.schedule.clone(), run.clone());
    }
}

async fn enqueue_sync(
    sync_tx: &mpsc::Sender<SyncJob>,
    target: SyncTarget,
    source: &'static str,
) -> Result<Vec<ScheduleRun>, DaemonError> {
    let (tx, rx) = oneshot::channel();
    sync_tx
        .send(SyncJob {
            target,
            source,
            respond_to: tx,
        })
        .await
        .map_err(|_| DaemonError::ChannelClosed("sync queue"))?;

    rx.await
        .map_err(|_| DaemonError::ChannelClosed("sync response"))
}

/// Resolve a socket `sync` request against the configured schedules.
///
/// A configured schedule for the entity type lends its filters (and its
/// direction when none was requested).
fn sync_target(
    settings: &DaemonSettings,
    entity_type: Option<EntityType>,
    direction: Option<SyncDirection>,
) -> Result<SyncTarget, DaemonError> {
    let Some(entity_type) = entity_type else {
        if direction.is_some() {
            return Err(DaemonError::Protocol(
                "'direction' requires 'entity_type'".to_string(),
            ));
        }
        return Ok(SyncTarget::All);
    };

    let configured = settings.schedules.iter().find(|schedule| {
        schedule.entity_type == entity_type
            && direction.map_or(true, |direction| direction == schedule.direction)
    });
    let schedule = match configured {
        Some(schedule) => schedule.clone(),
        None => Schedule {
            entity_type,
            direction: direction.unwrap_or_default(),
            filters: BTreeMap::new(),
        },
    };
    Ok(SyncTarget::Schedule(schedule))
}

async fn socket_server_task(
    context: SocketContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&context.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "listening for daemon requests");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let context = context.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, context).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, context: SocketContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let response = match request.cmd.as_str() {
            "status" => DaemonResponse::ok(
                build_status_payload(
                    &context.home,
                    &context.settings,
                    &context.stats,
                    context.started_at_unix,
                )
                .await,
            ),
            "sync" => {
                let queued =
                    match sync_target(&context.settings, request.entity_type, request.direction) {
                        Ok(target) => enqueue_sync(&context.sync_tx, target, "socket").await,
                        Err(err) => Err(err),
                    };
                match queued {
                    Ok(runs) => DaemonResponse::ok(json!({ "runs": runs })),
                    Err(err) => DaemonResponse::error(err.to_string()),
                }
            }
            "stop" => {
                let _ = context.shutdown_tx.send(());
                DaemonResponse::ok(json!({ "stopping": true }))
            }
            other => DaemonResponse::error(format!("unknown command '{other}'")),
        };

        write_response(&mut writer, &response).await?;
        if request.cmd == "stop" {
            break;
        }
    }

    Ok(())
}

async fn build_status_payload(
    home: &Path,
    settings: &DaemonSettings,
    stats: &RwLock<DaemonStats>,
    started_at_unix: u64,
) -> Value {
    // Clone under the read lock, assemble JSON after it is released.
    let stats = stats.read().await.clone();

    let schedules: Vec<Value> = settings
        .schedules
        .iter()
        .map(|schedule| {
            let label = schedule.label();
            json!({
                "schedule": label,
                "entity_type": schedule.entity_type,
                "direction": schedule.direction,
                "filters": schedule.filters,
                "last_run": stats.last_runs.get(&label),
            })
        })
        .collect();

    let last_run_at_unix = stats
        .last_runs
        .values()
        .map(|run| run.finished_at_unix)
        .max()
        .unwrap_or(0);

    json!({
        "running": true,
        "pid": std::process::id(),
        "started_at_unix": started_at_unix,
        "interval_secs": settings.interval_secs,
        "last_run_at_unix": last_run_at_unix,
        "schedules": schedules,
        "last_runs": stats.last_runs.values().collect::<Vec<_>>(),
        "totals": stats.totals,
        "socket": socket_path(home).display().to_string(),
        "log": log_path(home).display().to_string(),
    })
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // No rotation on startup.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    crate::log_rotation::rotate_logs(&home);
                })
                .await
                .ok();
            }
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [devbridge_root(home), logs_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Appends to the daemon log, reopening by path so rotation takes effect.
#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
}

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = Box<dyn io::Write + 'a>;

    fn make_writer(&'a self) -> Self::Writer {
        match fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::sink()),
        }
    }
}

/// Stdout plus `~/.devbridge/logs/daemon.log`. `RUST_LOG` overrides the
/// `info` default; `DEVBRIDGE_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing(home: &Path) {
    use tracing_subscriber::fmt::writer::MakeWriterExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let writer = io::stdout.and(LogFile {
        path: log_path(home),
    });
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer);
    let json = std::env::var("DEVBRIDGE_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
