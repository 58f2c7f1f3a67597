use std::path::{Path, PathBuf};

pub const DAEMON_LOG: &str = "daemon.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn devbridge_root(home: &Path) -> PathBuf {
    devbridge_core::config::root_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    devbridge_root(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    devbridge_root(home).join("logs")
}

pub fn log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_LOG)
}
