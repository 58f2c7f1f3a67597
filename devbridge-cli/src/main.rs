//! devbridge keeps GitHub and Azure DevOps entities in sync.
//!
//! # Usage
//!
//! ```text
//! devbridge init --owner O --repo R --organization ORG --project P [--force]
//! devbridge sync <type> <id> [--direction D] [--force] [--json]
//! devbridge bulk <type> [--direction D] [--filter k=v]... [--concurrency N] [--json]
//! devbridge verify <type> <id> [--json]
//! devbridge resolve <type> <id> --source github|azure [--json]
//! devbridge diff <type> <id>
//! devbridge status [--type T] [--json]
//! devbridge forget <type> <id>
//! devbridge daemon start|stop|status|sync|logs
//! ```
//!
//! `--offline <fixture.json>` swaps both platforms for in-memory copies
//! loaded from the fixture; writes are saved back to it.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    bulk::BulkArgs, daemon::DaemonCommand, diff::DiffArgs, forget::ForgetArgs, init::InitArgs,
    resolve::ResolveArgs, status::StatusArgs, sync::SyncArgs, verify::VerifyArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "devbridge",
    version,
    about = "Synchronize issues, pull requests and more between GitHub and Azure DevOps",
    long_about = None,
)]
struct Cli {
    /// Use in-memory platforms seeded from this JSON fixture instead of the live APIs.
    #[arg(long, global = true, value_name = "FIXTURE")]
    offline: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.devbridge/config.yaml.
    Init(InitArgs),

    /// Sync one entity.
    Sync(SyncArgs),

    /// Sync every listed entity of one type.
    Bulk(BulkArgs),

    /// Compare both sides of an entity without writing.
    Verify(VerifyArgs),

    /// Force one side's content onto the other.
    Resolve(ResolveArgs),

    /// Show field-level differences as unified diffs.
    Diff(DiffArgs),

    /// List ledger entries.
    Status(StatusArgs),

    /// Drop the ledger entry of an entity deleted on both platforms.
    Forget(ForgetArgs),

    /// Run or control the background scheduler.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    // The daemon installs its own subscriber with a log file writer.
    if !matches!(
        cli.command,
        Commands::Daemon {
            command: DaemonCommand::Start
        }
    ) {
        init_tracing();
    }

    let offline = cli.offline.as_deref();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Sync(args) => args.run(offline),
        Commands::Bulk(args) => args.run(offline),
        Commands::Verify(args) => args.run(offline),
        Commands::Resolve(args) => args.run(offline),
        Commands::Diff(args) => args.run(offline),
        Commands::Status(args) => args.run(),
        Commands::Forget(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command, offline),
    }
}

/// Warnings and errors on stderr; `RUST_LOG` raises the level.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
