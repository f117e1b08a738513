//! Pluggable reversible-delete. `trash::delete` is synchronous and can block
//! on cross-volume copy+unlink fallback, so the default implementation runs
//! it on a blocking thread, mirroring how the teacher app isolates
//! `trash::delete` from its async/event-loop code.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{Result, TrashError};

#[derive(Debug, Clone)]
pub struct TrashOutcome {
    pub src_path: PathBuf,
    pub success: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait TrashService: Send + Sync {
    /// Moves `path` to the platform trash. Fails loudly only when `path`
    /// doesn't exist before the attempt; every other failure mode returns
    /// `success: false` with a message rather than an error, since trash
    /// failure must never block or undo a conversion/rename that already
    /// succeeded.
    async fn move_to_trash(&self, path: &Path) -> Result<TrashOutcome>;
}

pub struct SystemTrashService;

impl SystemTrashService {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemTrashService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrashService for SystemTrashService {
    async fn move_to_trash(&self, path: &Path) -> Result<TrashOutcome> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(TrashError::NotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let owned = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || trash::delete(&owned))
            .await
            .map_err(|e| TrashError::Failed {
                path: path.to_path_buf(),
                reason: format!("trash task panicked: {e}"),
            })?;

        match result {
            Ok(()) => Ok(TrashOutcome {
                src_path: path.to_path_buf(),
                success: true,
                error: None,
            }),
            Err(e) => Ok(TrashOutcome {
                src_path: path.to_path_buf(),
                success: false,
                error: Some(e.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_errors_rather_than_returning_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.txt");
        let svc = SystemTrashService::new();
        let result = svc.move_to_trash(&missing).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn existing_file_is_trashed_successfully() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doomed.txt");
        tokio::fs::write(&path, b"data").await.unwrap();
        let svc = SystemTrashService::new();
        let outcome = svc.move_to_trash(&path).await.unwrap();
        assert!(outcome.success);
        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }
}
