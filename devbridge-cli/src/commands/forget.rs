//! `devbridge forget <type> <id>`

use anyhow::{Context, Result};
use clap::Args;

use devbridge_core::{config, EntityRef, EntityType};
use devbridge_sync::Ledger;

/// Arguments for `devbridge forget`.
#[derive(Args, Debug)]
pub struct ForgetArgs {
    pub entity_type: EntityType,

    pub id: String,
}

impl ForgetArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let entity = EntityRef::new(self.entity_type, self.id);
        let removed = Ledger::open(&home)
            .remove(&entity)
            .with_context(|| format!("failed to update the ledger for {entity}"))?;
        match removed {
            Some(_) => println!("Forgot {entity}."),
            None => println!("{entity} has no ledger entry."),
        }
        Ok(())
    }
}
