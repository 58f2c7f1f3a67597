//! Shared setup for commands that talk to both platforms.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use devbridge_core::{config, BridgeConfig};
use devbridge_sync::{
    AuditLog, CancellationToken, Fixture, Ledger, MemoryAdapter, PlatformAdapter,
    SyncOrchestrator,
};

/// In-memory platforms loaded from, and saved back to, a fixture file.
pub struct OfflinePlatforms {
    fixture: PathBuf,
    github: Arc<MemoryAdapter>,
    azure: Arc<MemoryAdapter>,
}

impl OfflinePlatforms {
    fn load(path: &Path) -> Result<Self> {
        let fixture = Fixture::load(path)
            .with_context(|| format!("failed to load fixture {}", path.display()))?;
        let (github, azure) = fixture.adapters();
        Ok(Self {
            fixture: path.to_path_buf(),
            github: Arc::new(github),
            azure: Arc::new(azure),
        })
    }

    pub fn save(&self) -> Result<()> {
        Fixture::from_adapters(&self.github, &self.azure)
            .save(&self.fixture)
            .with_context(|| format!("failed to save fixture {}", self.fixture.display()))
    }
}

/// Loaded config plus an orchestrator wired to live or offline platforms.
pub struct Session {
    pub home: PathBuf,
    pub config: BridgeConfig,
    orchestrator: SyncOrchestrator,
    offline: Option<OfflinePlatforms>,
}

impl Session {
    pub fn open(offline: Option<&Path>) -> Result<Self> {
        let home = config::home().context("could not determine home directory")?;
        let config = config::load_at(&home).context("failed to load devbridge config")?;

        let offline = offline.map(OfflinePlatforms::load).transpose()?;
        let (github, azure): (Arc<dyn PlatformAdapter>, Arc<dyn PlatformAdapter>) = match &offline
        {
            Some(platforms) => {
                tracing::debug!(fixture = %platforms.fixture.display(), "using offline platforms");
                let github: Arc<dyn PlatformAdapter> = platforms.github.clone();
                let azure: Arc<dyn PlatformAdapter> = platforms.azure.clone();
                (github, azure)
            }
            None => devbridge_platforms::adapters_from_config(&config)
                .context("failed to set up platform clients")?,
        };

        let orchestrator =
            SyncOrchestrator::from_settings(github, azure, Ledger::open(&home), &config.sync)
                .with_audit_log(AuditLog::at(&home));
        Ok(Self {
            home,
            config,
            orchestrator,
            offline,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.orchestrator = self.orchestrator.with_concurrency(concurrency);
        self
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    /// Persist offline platform state after a command that may have written.
    pub fn save_offline(&self) -> Result<()> {
        match &self.offline {
            Some(platforms) => platforms.save(),
            None => Ok(()),
        }
    }

    pub fn into_parts(self) -> (PathBuf, BridgeConfig, SyncOrchestrator, Option<OfflinePlatforms>) {
        (self.home, self.config, self.orchestrator, self.offline)
    }
}

/// Drive `work` on a fresh runtime; ctrl-c cancels the token it receives.
pub fn block_on<F, Fut, T>(work: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = T>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let cancel = CancellationToken::new();
    Ok(runtime.block_on(async {
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("ctrl-c received, cancelling");
                on_signal.cancel();
            }
        });
        work(cancel).await
    }))
}
