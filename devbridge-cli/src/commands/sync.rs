//! `devbridge sync <type> <id>` — sync one entity.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use devbridge_core::{EntityType, SyncDirection};

use super::output::{print_json, print_outcome};
use super::session::{self, Session};

/// Arguments for `devbridge sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// issue, pull_request, comment, commit, wiki or release.
    pub entity_type: EntityType,

    /// Entity id, shared by both platforms.
    pub id: String,

    /// github_to_azure, azure_to_github or bidirectional.
    #[arg(long, short = 'd', default_value = "github_to_azure")]
    pub direction: SyncDirection,

    /// Write even when the ledger says nothing changed.
    #[arg(long)]
    pub force: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self, offline: Option<&Path>) -> Result<()> {
        let SyncArgs {
            entity_type,
            id,
            direction,
            force,
            json,
        } = self;
        let session = Session::open(offline)?;
        let orchestrator = session.orchestrator();
        let id_ref = id.as_str();

        let outcome = session::block_on(|cancel| async move {
            orchestrator
                .sync_entity(entity_type, id_ref, direction, force, &cancel)
                .await
        })?
        .with_context(|| format!("sync failed for {entity_type}/{id}"))?;
        session.save_offline()?;

        if json {
            return print_json(&outcome);
        }
        print_outcome(&outcome);
        Ok(())
    }
}
