//! The single choke point for disk mutation: stability polling and
//! atomic-rename retry discipline, so every other component composes with
//! the cooperative scheduler in §5 instead of blocking on its own I/O.

use std::path::Path;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::{Result, WatchError};

/// Polling interval for the size-stability check.
pub const STABILITY_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// Idle budget after which a file is considered stable even if it has only
/// been observed once (first-seen file that hasn't changed since).
pub const STABILITY_IDLE_BUDGET: Duration = Duration::from_millis(750);

const RENAME_MAX_ATTEMPTS: usize = 10;
const EBUSY_BACKOFF_MIN: Duration = Duration::from_millis(50);
const EBUSY_BACKOFF_MAX: Duration = Duration::from_millis(150);
const ENOENT_BACKOFF_MIN: Duration = Duration::from_millis(150);
const ENOENT_BACKOFF_MAX: Duration = Duration::from_millis(400);

/// True when `path`'s size hasn't changed across two polls 250ms apart, or
/// when it's been observed for at least 750ms without a second read. A file
/// that disappears mid-poll (ENOENT) is reported as unstable, not an error.
pub async fn is_stable(path: &Path) -> Result<bool> {
    let start = Instant::now();
    let mut last_size = match read_size(path).await? {
        Some(size) => size,
        None => return Ok(false),
    };

    loop {
        tokio::time::sleep(STABILITY_POLL_INTERVAL).await;
        let size = match read_size(path).await? {
            Some(size) => size,
            None => return Ok(false),
        };
        if size == last_size {
            return Ok(true);
        }
        last_size = size;
        if start.elapsed() >= STABILITY_IDLE_BUDGET {
            return Ok(true);
        }
    }
}

async fn read_size(path: &Path) -> Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(WatchError::Io {
            path: path.to_path_buf(),
            source: e,
        }
        .into()),
    }
}

/// Rename `from` to `to`, creating `to`'s parent directory if needed.
/// Retries on EBUSY (short jittered backoff) and ENOENT (longer backoff, the
/// source may not have finished appearing yet); all other errors surface
/// immediately.
pub async fn atomic_rename(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| crate::error::RenameError::Io {
                from: from.to_path_buf(),
                to: to.to_path_buf(),
                source: e,
            })?;
    }

    let mut attempt = 0;
    loop {
        match tokio::fs::rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempt += 1;
                let retryable_busy = matches!(e.raw_os_error(), Some(code) if code == libc_ebusy());
                let retryable_missing = e.kind() == std::io::ErrorKind::NotFound;
                if attempt >= RENAME_MAX_ATTEMPTS || !(retryable_busy || retryable_missing) {
                    return Err(crate::error::RenameError::Io {
                        from: from.to_path_buf(),
                        to: to.to_path_buf(),
                        source: e,
                    }
                    .into());
                }
                let backoff = if retryable_busy {
                    jittered(EBUSY_BACKOFF_MIN, EBUSY_BACKOFF_MAX)
                } else {
                    jittered(ENOENT_BACKOFF_MIN, ENOENT_BACKOFF_MAX)
                };
                tracing::debug!(
                    from = %from.display(),
                    to = %to.display(),
                    attempt,
                    ?backoff,
                    "atomic_rename retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

fn jittered(min: Duration, max: Duration) -> Duration {
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    Duration::from_millis(ms)
}

#[cfg(target_os = "linux")]
fn libc_ebusy() -> i32 {
    16
}

#[cfg(target_os = "macos")]
fn libc_ebusy() -> i32 {
    16
}

#[cfg(target_os = "windows")]
fn libc_ebusy() -> i32 {
    32
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn libc_ebusy() -> i32 {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_stable_false_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.txt");
        assert!(!is_stable(&missing).await.unwrap());
    }

    #[tokio::test]
    async fn is_stable_true_once_size_settles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steady.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();
        assert!(is_stable(&path).await.unwrap());
    }

    #[tokio::test]
    async fn atomic_rename_moves_file_and_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("src.txt");
        let to = dir.path().join("nested").join("dst.txt");
        tokio::fs::write(&from, b"data").await.unwrap();
        atomic_rename(&from, &to).await.unwrap();
        assert!(!tokio::fs::try_exists(&from).await.unwrap());
        assert_eq!(tokio::fs::read(&to).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn atomic_rename_missing_source_eventually_errors() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("never-existed.txt");
        let to = dir.path().join("dst.txt");
        let result = atomic_rename(&from, &to).await;
        assert!(result.is_err());
    }
}
