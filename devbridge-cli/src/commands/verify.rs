//! `devbridge verify <type> <id>` — read-only comparison.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;

use devbridge_core::EntityType;
use devbridge_sync::VerifyReport;

use super::output::{format_age, print_differences, print_json, short_hash};
use super::session::{self, Session};

/// Arguments for `devbridge verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub entity_type: EntityType,

    pub id: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl VerifyArgs {
    pub fn run(self, offline: Option<&Path>) -> Result<()> {
        let VerifyArgs {
            entity_type,
            id,
            json,
        } = self;
        let session = Session::open(offline)?;
        let orchestrator = session.orchestrator();
        let id_ref = id.as_str();

        let report = session::block_on(|_cancel| async move {
            orchestrator.verify_sync(entity_type, id_ref).await
        })?
        .with_context(|| format!("verify failed for {entity_type}/{id}"))?;

        if json {
            return print_json(&report);
        }
        print_verify(&report);
        Ok(())
    }
}

pub fn print_verify(report: &VerifyReport) {
    let verdict = if report.is_synced {
        "IN SYNC".green().bold()
    } else {
        "DIVERGED".red().bold()
    };
    println!("{verdict} {}", report.entity);
    println!("  github {}", short_hash(&report.github_hash));
    println!("  azure  {}", short_hash(&report.azure_hash));
    match report.last_sync {
        Some(at) => println!("  last sync {}", format_age(at, Utc::now())),
        None => println!("  last sync never"),
    }
    print_differences(&report.differences, "github", "azure");
}
