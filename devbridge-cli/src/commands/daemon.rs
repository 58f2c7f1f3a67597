//! `devbridge daemon` — background scheduler lifecycle.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use devbridge_core::{config, EntityType, SyncDirection};
use devbridge_daemon::paths::{log_path, socket_path};
use devbridge_daemon::{request_status, request_stop, request_sync, start_blocking, DaemonError};

use super::output::print_json;
use super::session::Session;

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + socket server).
    Start,
    /// Request graceful daemon shutdown over the Unix socket.
    Stop,
    /// Query daemon runtime status over the Unix socket.
    Status,
    /// Ask the running daemon to sync now and wait for the results.
    Sync(DaemonSyncArgs),
    /// Print recent daemon log lines.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonSyncArgs {
    /// Sync only this entity type; all configured schedules otherwise.
    #[arg(long = "type")]
    pub entity_type: Option<EntityType>,

    /// Direction for `--type`; defaults to the configured schedule's.
    #[arg(long, short = 'd', requires = "entity_type")]
    pub direction: Option<SyncDirection>,
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,
}

pub fn run(command: DaemonCommand, offline: Option<&Path>) -> Result<()> {
    let home = config::home().context("could not determine home directory")?;

    match command {
        DaemonCommand::Start => {
            let (home, config, orchestrator, offline) = Session::open(offline)?.into_parts();
            start_blocking(&home, orchestrator, config.daemon)
                .context("daemon exited with error")?;
            if let Some(platforms) = offline {
                platforms.save()?;
            }
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&home) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
        DaemonCommand::Sync(args) => {
            let result = request_sync(&home, args.entity_type, args.direction)
                .context("daemon sync request failed")?;
            print_json(&result)?;
        }
        DaemonCommand::Logs(args) => {
            print_tail(&log_path(&home), args.lines).context("failed to read daemon log")?;
        }
    }

    Ok(())
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::with_capacity(lines);
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if lines == 0 {
            continue;
        }
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
