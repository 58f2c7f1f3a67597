//! `devbridge init --owner O --repo R --organization ORG --project P`

use anyhow::{Context, Result};
use clap::Args;

use devbridge_core::{config, AzureConfig, BridgeConfig, GitHubConfig};

/// Write the platform coordinates to ~/.devbridge/config.yaml.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// GitHub repository owner (user or organization).
    #[arg(long)]
    pub owner: String,

    /// GitHub repository name.
    #[arg(long)]
    pub repo: String,

    /// Azure DevOps organization.
    #[arg(long)]
    pub organization: String,

    /// Azure DevOps project.
    #[arg(long)]
    pub project: String,

    /// Azure Repos repository; required for pull requests and commits.
    #[arg(long)]
    pub repository: Option<String>,

    /// Azure wiki identifier; required for wiki pages.
    #[arg(long)]
    pub wiki: Option<String>,

    /// Replace an existing config.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = config::home().context("could not determine home directory")?;
        let path = config::config_path_at(&home);
        let existed = path.exists();

        let mut azure = AzureConfig::new(self.organization, self.project);
        azure.repository = self.repository;
        azure.wiki = self.wiki;
        let bridge = BridgeConfig::new(GitHubConfig::new(self.owner, self.repo), azure);

        let written = config::init_at(&home, bridge, self.force)
            .with_context(|| format!("failed to write {}", path.display()))?;

        if existed && !self.force {
            println!("Config already exists at {}; pass --force to replace it.", path.display());
            return Ok(());
        }
        println!(
            "✓ Linked {}/{} with {}/{}",
            written.github.owner,
            written.github.repo,
            written.azure.organization,
            written.azure.project
        );
        println!("  Saved to: {}", path.display());
        println!(
            "  Tokens are read from ${} and ${}.",
            written.github.token_env, written.azure.token_env
        );
        Ok(())
    }
}
