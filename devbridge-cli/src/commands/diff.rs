//! `devbridge diff <type> <id>` — unified diffs of differing fields.

use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use devbridge_core::EntityType;
use devbridge_sync::comparator::render_text_diff;

use super::output::compact;
use super::session::{self, Session};

/// Arguments for `devbridge diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    pub entity_type: EntityType,

    pub id: String,
}

impl DiffArgs {
    pub fn run(self, offline: Option<&Path>) -> Result<()> {
        let DiffArgs { entity_type, id } = self;
        let session = Session::open(offline)?;
        let orchestrator = session.orchestrator();
        let id_ref = id.as_str();

        let report = session::block_on(|_cancel| async move {
            orchestrator.verify_sync(entity_type, id_ref).await
        })?
        .with_context(|| format!("diff failed for {entity_type}/{id}"))?;

        if report.differences.is_empty() {
            println!("No differences for {}.", report.entity);
            return Ok(());
        }

        for diff in &report.differences {
            match render_text_diff(diff, "github", "azure") {
                Some(text) => {
                    print!("{text}");
                    if !text.ends_with('\n') {
                        println!();
                    }
                }
                None => {
                    println!("--- github/{}", diff.field);
                    println!("+++ azure/{}", diff.field);
                    println!("-{}", compact(&diff.left));
                    println!("+{}", compact(&diff.right));
                }
            }
        }
        Ok(())
    }
}
