//! `devbridge resolve <type> <id> --source github|azure`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use devbridge_core::{EntityType, Platform};
use devbridge_sync::{Resolution, ResolveStatus};

use super::output::{print_json, print_outcome, resolve_label};
use super::session::{self, Session};
use super::verify::print_verify;

/// Arguments for `devbridge resolve`.
#[derive(Args, Debug)]
pub struct ResolveArgs {
    pub entity_type: EntityType,

    pub id: String,

    /// Platform whose content wins: github or azure.
    #[arg(long)]
    pub source: Platform,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ResolveArgs {
    pub fn run(self, offline: Option<&Path>) -> Result<()> {
        let ResolveArgs {
            entity_type,
            id,
            source,
            json,
        } = self;
        let session = Session::open(offline)?;
        let orchestrator = session.orchestrator();
        let id_ref = id.as_str();

        let report = session::block_on(|cancel| async move {
            orchestrator
                .resolve_conflict(entity_type, id_ref, Resolution { source }, &cancel)
                .await
        })?
        .with_context(|| format!("resolve failed for {entity_type}/{id}"))?;
        session.save_offline()?;

        if json {
            print_json(&report)?;
        } else {
            println!("{} {} from {source}", resolve_label(report.status), report.entity);
            if let Some(sync) = &report.sync {
                print_outcome(sync);
            }
            if let Some(after) = &report.after {
                print_verify(after);
            }
        }
        if report.status == ResolveStatus::Failed {
            bail!("{entity_type}/{id} still differs after resolution");
        }
        Ok(())
    }
}
