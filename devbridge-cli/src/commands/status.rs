//! `devbridge status` — what the ledger knows, per entity type.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use devbridge_core::{config, EntityType};
use devbridge_daemon::{send_request, DaemonError, DaemonRequest};
use devbridge_sync::Ledger;

use super::output::{format_age, print_json, short_hash};

/// Arguments for `devbridge status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show one entity type.
    #[arg(long = "type")]
    pub entity_type: Option<EntityType>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusRow {
    entity_type: EntityType,
    entity_id: String,
    last_sync: DateTime<Utc>,
    github_hash: String,
    azure_hash: String,
    in_sync: bool,
}

#[derive(Serialize)]
struct StatusReport {
    daemon_running: bool,
    entities: Vec<StatusRow>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "type")]
    entity_type: String,
    #[tabled(rename = "id")]
    entity_id: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "github")]
    github: String,
    #[tabled(rename = "azure")]
    azure: String,
    #[tabled(rename = "state")]
    state: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let ledger = Ledger::open(&home);

        let types: Vec<EntityType> = match self.entity_type {
            Some(entity_type) => vec![entity_type],
            None => EntityType::all().to_vec(),
        };
        let mut entities = Vec::new();
        for entity_type in types {
            let entries = ledger
                .entries(entity_type)
                .with_context(|| format!("failed to read the {entity_type} ledger"))?;
            entities.extend(entries.into_iter().map(|(entity_id, entry)| StatusRow {
                entity_type,
                entity_id,
                in_sync: entry.github_hash == entry.azure_hash,
                last_sync: entry.last_sync,
                github_hash: entry.github_hash,
                azure_hash: entry.azure_hash,
            }));
        }

        // One attempt; `request_status` would retry while a daemon starts up.
        let daemon_running = match send_request(&home, &DaemonRequest::command("status")) {
            Ok(response) => response.ok,
            Err(DaemonError::DaemonNotRunning { .. }) => false,
            Err(err) => {
                tracing::debug!("daemon status unavailable: {err}");
                false
            }
        };

        let report = StatusReport {
            daemon_running,
            entities,
        };
        if self.json {
            return print_json(&report);
        }
        print_table(report);
        Ok(())
    }
}

fn print_table(report: StatusReport) {
    let daemon = if report.daemon_running {
        "daemon running".green()
    } else {
        "daemon stopped".bright_black()
    };
    println!(
        "devbridge v{} | {} entities | {daemon}",
        env!("CARGO_PKG_VERSION"),
        report.entities.len(),
    );

    if report.entities.is_empty() {
        println!("Nothing synced yet.");
        return;
    }

    let now = Utc::now();
    let rows: Vec<StatusTableRow> = report
        .entities
        .into_iter()
        .map(|row| StatusTableRow {
            entity_type: row.entity_type.to_string(),
            entity_id: row.entity_id,
            last_sync: format_age(row.last_sync, now),
            github: short_hash(&row.github_hash).to_string(),
            azure: short_hash(&row.azure_hash).to_string(),
            state: if row.in_sync {
                "in sync".green().to_string()
            } else {
                "diverged".yellow().to_string()
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
