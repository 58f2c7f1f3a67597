//! Config error-message and on-disk layout integration tests.

use assert_fs::prelude::*;
use devbridge_core::{
    config::{self, config_path_at},
    AzureConfig, BridgeConfig, ConfigError, GitHubConfig,
};
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;

fn sample() -> BridgeConfig {
    BridgeConfig::new(
        GitHubConfig::new("acme", "widgets"),
        AzureConfig::new("acme", "widgets"),
    )
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_mentions_init() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    let msg = err.to_string();
    assert!(msg.contains("config.yaml"), "must contain file path, got: {msg}");
    assert!(msg.contains("devbridge init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".devbridge/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[rstest]
#[case::empty_owner(
    "version: 1\ngithub:\n  owner: ''\n  repo: widgets\nazure:\n  organization: acme\n  project: widgets\n"
)]
#[case::empty_project(
    "version: 1\ngithub:\n  owner: acme\n  repo: widgets\nazure:\n  organization: acme\n  project: ''\n"
)]
#[case::zero_concurrency(
    "version: 1\ngithub:\n  owner: acme\n  repo: widgets\nazure:\n  organization: acme\n  project: widgets\nsync:\n  concurrency: 0\n"
)]
fn load_rejects_invalid_config(#[case] yaml: &str) {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".devbridge/config.yaml").write_str(yaml).expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. On-disk layout
// ---------------------------------------------------------------------------

#[test]
fn init_writes_config_yaml_under_devbridge_root() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), sample(), false).expect("init");

    home.child(".devbridge/config.yaml")
        .assert(predicate::path::exists());
    home.child(".devbridge/config.yaml")
        .assert(predicate::str::contains("owner: acme"));
    home.child(".devbridge/config.yaml.tmp")
        .assert(predicate::path::missing());
}

#[cfg(unix)]
#[test]
fn config_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &sample()).expect("save");
    let mode = fs::metadata(config_path_at(home.path()))
        .expect("metadata")
        .permissions()
        .mode()
        & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn token_value_is_never_written() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::save_at(home.path(), &sample()).expect("save");
    let yaml = fs::read_to_string(config_path_at(home.path())).expect("read");
    assert!(yaml.contains("token_env: GITHUB_TOKEN"));
    assert!(yaml.contains("token_env: AZURE_DEVOPS_PAT"));
}
