//! `devbridge bulk <type>` — sync every listed entity of one type.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use devbridge_core::{EntityType, SyncDirection};
use devbridge_sync::{BulkSyncReport, ListFilter};

use super::output::{print_json, status_label};
use super::session::{self, Session};

/// Arguments for `devbridge bulk`.
#[derive(Args, Debug)]
pub struct BulkArgs {
    /// issue, pull_request, comment, commit, wiki or release.
    pub entity_type: EntityType,

    #[arg(long, short = 'd', default_value = "github_to_azure")]
    pub direction: SyncDirection,

    /// Listing filter passed to the platform, e.g. `--filter state=open`.
    #[arg(long = "filter", value_name = "KEY=VALUE", value_parser = parse_filter)]
    pub filters: Vec<(String, String)>,

    /// Entities synced at once; defaults to `sync.concurrency` from config.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct BulkRow {
    #[tabled(rename = "entity")]
    entity: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "written to")]
    written_to: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl BulkArgs {
    pub fn run(self, offline: Option<&Path>) -> Result<()> {
        let BulkArgs {
            entity_type,
            direction,
            filters,
            concurrency,
            json,
        } = self;
        let mut session = Session::open(offline)?;
        if let Some(concurrency) = concurrency {
            session = session.with_concurrency(concurrency);
        }
        let filter: ListFilter = filters.into_iter().collect();
        let orchestrator = session.orchestrator();
        let filter_ref = &filter;

        let report = session::block_on(|cancel| async move {
            orchestrator
                .bulk_sync(entity_type, direction, filter_ref, &cancel)
                .await
        })?
        .with_context(|| format!("bulk sync of {entity_type} failed"))?;
        session.save_offline()?;

        if json {
            print_json(&report)?;
        } else {
            print_report(&report);
        }
        if report.has_failures() {
            bail!(
                "{} of {} entities failed{}",
                report.failed,
                report.total,
                report
                    .aborted
                    .as_ref()
                    .map(|reason| format!(" (aborted: {reason})"))
                    .unwrap_or_default()
            );
        }
        Ok(())
    }
}

fn print_report(report: &BulkSyncReport) {
    println!(
        "{} {} | {} total | {} synced | {} up to date | {} conflicts | {} failed",
        report.entity_type.as_str().bold(),
        report.direction,
        report.total,
        report.successful,
        report.skipped,
        report.conflicts,
        report.failed,
    );
    if let Some(reason) = &report.aborted {
        println!("{} {reason}", "aborted:".red().bold());
    }
    if report.results.is_empty() {
        println!("Nothing listed.");
        return;
    }

    let rows: Vec<BulkRow> = report
        .results
        .iter()
        .map(|outcome| BulkRow {
            entity: outcome.entity.entity_id().to_string(),
            status: status_label(outcome.status).to_string(),
            written_to: outcome
                .written_to
                .map(|platform| platform.to_string())
                .unwrap_or_default(),
            detail: match &outcome.error {
                Some(error) => error.clone(),
                None if outcome.differences.is_empty() => String::new(),
                None => outcome
                    .differences
                    .iter()
                    .map(|diff| diff.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            },
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
