//! devbridge core library: domain types and configuration.
//!
//! - [`types`] — entity types, references, snapshots, directions
//! - [`config`] — `~/.devbridge/config.yaml` load / save / init
//! - [`error`] — [`ConfigError`], [`ParseEnumError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    AzureConfig, BridgeConfig, DaemonSettings, GitHubConfig, HttpSettings, RetrySettings,
    Schedule, SyncSettings,
};
pub use error::{ConfigError, ParseEnumError};
pub use types::{EntityRef, EntityType, Platform, Snapshot, SyncDirection};
