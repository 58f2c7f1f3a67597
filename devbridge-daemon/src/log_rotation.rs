//! Size-based rotation of `~/.devbridge/logs/daemon.log`.
//!
//! Keeps at most [`MAX_ROTATED_FILES`] copies: `daemon.log.1` is the newest,
//! `daemon.log.5` the oldest.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` once it reaches `max_bytes`.
///
/// Returns `true` when a rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    let oldest = numbered_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..max_files).rev() {
        let src = numbered_path(log_path, n);
        if src.exists() {
            fs::rename(&src, numbered_path(log_path, n + 1))?;
        }
    }
    fs::rename(log_path, numbered_path(log_path, 1))?;

    // The tracing writer reopens by path, so a fresh file picks up new lines.
    fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(log_path)?;
    Ok(true)
}

/// Rotate the daemon log under `home`, logging instead of failing.
pub fn rotate_logs(home: &Path) {
    let log_path = crate::paths::log_path(home);
    match rotate_if_needed(&log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
        }
    }
}

fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::DAEMON_LOG);
    base.with_file_name(format!("{name}.{n}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL_LIMIT: u64 = 64;

    #[test]
    fn small_log_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, "short line\n").unwrap();

        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_log_moves_to_first_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, vec![b'x'; SMALL_LIMIT as usize + 1]).unwrap();

        assert!(rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(
            fs::metadata(numbered_path(&log, 1)).unwrap().len(),
            SMALL_LIMIT + 1
        );
    }

    #[test]
    fn copies_are_capped_and_shifted() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        for n in 1..=MAX_ROTATED_FILES {
            fs::write(numbered_path(&log, n), format!("copy-{n}")).unwrap();
        }
        fs::write(&log, vec![b'y'; SMALL_LIMIT as usize]).unwrap();

        assert!(rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
        assert_eq!(fs::read_to_string(numbered_path(&log, 2)).unwrap(), "copy-1");
        assert_eq!(
            fs::read_to_string(numbered_path(&log, MAX_ROTATED_FILES)).unwrap(),
            format!("copy-{}", MAX_ROTATED_FILES - 1)
        );
        assert!(!numbered_path(&log, MAX_ROTATED_FILES + 1).exists());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("absent.log");
        assert!(!rotate_if_needed(&log, SMALL_LIMIT, MAX_ROTATED_FILES).unwrap());
    }

    #[test]
    fn rotate_logs_uses_the_daemon_log_path() {
        let home = TempDir::new().unwrap();
        let log = crate::paths::log_path(home.path());
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, "tiny").unwrap();

        rotate_logs(home.path());
        assert_eq!(fs::read_to_string(&log).unwrap(), "tiny");
    }
}
