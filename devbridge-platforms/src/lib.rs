//! # devbridge-platforms
//!
//! REST implementations of [`devbridge_sync::PlatformAdapter`] for GitHub and
//! Azure DevOps.

pub mod azure;
pub mod error;
pub mod github;
mod http;

use std::sync::Arc;

use devbridge_core::BridgeConfig;
use devbridge_sync::PlatformAdapter;

pub use azure::AzureDevOpsAdapter;
pub use error::ClientError;
pub use github::GitHubAdapter;
pub use http::read_token;

/// Both adapters, tokens read from the environment variables the config names.
pub fn adapters_from_config(
    config: &BridgeConfig,
) -> Result<(Arc<dyn PlatformAdapter>, Arc<dyn PlatformAdapter>), ClientError> {
    let github = GitHubAdapter::from_config(&config.github, &config.http)?;
    let azure = AzureDevOpsAdapter::from_config(&config.azure, &config.http)?;
    tracing::debug!(
        "platform adapters ready for {}/{} and {}/{}",
        config.github.owner,
        config.github.repo,
        config.azure.organization,
        config.azure.project
    );
    Ok((Arc::new(github), Arc::new(azure)))
}
