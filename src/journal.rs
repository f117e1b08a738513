//! Append-only NDJSON log of applied rename/convert operations, with
//! single-step LIFO undo.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{JournalError, Result};
use crate::fs_safe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub from: PathBuf,
    pub to: PathBuf,
    pub ts: i64,
}

/// Outcome of an `undo()` call; mirrors `spec.md`'s `{ok, reason?}` contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl UndoResult {
    fn ok() -> Self {
        Self { ok: true, reason: None }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

struct Inner {
    entries: Option<Vec<JournalEntry>>,
}

/// Owns the on-disk journal file. The in-memory cache is lazily populated on
/// first use and kept consistent with disk by rewriting the whole file on
/// every mutation (append or undo) — entries are small and infrequent enough
/// that this is simpler than a true append-only writer with compaction.
pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl JournalStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner { entries: None }),
        }
    }

    pub fn at_default_path() -> Self {
        Self::new(crate::paths::journal_file())
    }

    async fn load(&self) -> Result<Vec<JournalEntry>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let mut entries = Vec::new();
                for (i, line) in contents.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: JournalEntry =
                        serde_json::from_str(line).map_err(|e| JournalError::Parse {
                            path: self.path.clone(),
                            line: i + 1,
                            source: e,
                        })?;
                    entries.push(entry);
                }
                Ok(entries)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(JournalError::Io {
                path: self.path.clone(),
                source: e,
            }
            .into()),
        }
    }

    async fn rewrite(&self, entries: &[JournalEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| JournalError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry).expect("JournalEntry always serializes"));
            body.push('\n');
        }
        let tmp_path = self.path.with_extension("ndjson.tmp");
        tokio::fs::write(&tmp_path, body.as_bytes())
            .await
            .map_err(|e| JournalError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| JournalError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }

    /// Append one entry, atomically rewriting the file and the in-memory
    /// cache together.
    pub async fn record(&self, from: PathBuf, to: PathBuf, ts: i64) -> Result<()> {
        let mut guard = self.inner.lock().await;
        let mut entries = match guard.entries.take() {
            Some(entries) => entries,
            None => self.load().await?,
        };
        entries.push(JournalEntry { from, to, ts });
        self.rewrite(&entries).await?;
        guard.entries = Some(entries);
        Ok(())
    }

    /// Pop the most recent entry and attempt to restore it. The journal is
    /// only mutated once the reverse rename has succeeded — a failed undo
    /// leaves the entry in place for a retry.
    pub async fn undo(&self) -> UndoResult {
        let mut guard = self.inner.lock().await;
        let mut entries = match guard.entries.take() {
            Some(entries) => entries,
            None => match self.load().await {
                Ok(entries) => entries,
                Err(e) => return UndoResult::failed(e.to_string()),
            },
        };

        let Some(last) = entries.last().cloned() else {
            guard.entries = Some(entries);
            return UndoResult::failed("empty");
        };

        let target = match restore_target(&last.from).await {
            Ok(target) => target,
            Err(e) => {
                guard.entries = Some(entries);
                return UndoResult::failed(e.to_string());
            }
        };

        if let Err(e) = fs_safe::atomic_rename(&last.to, &target).await {
            guard.entries = Some(entries);
            return UndoResult::failed(e.to_string());
        }

        entries.pop();
        if let Err(e) = self.rewrite(&entries).await {
            guard.entries = Some(entries);
            return UndoResult::failed(e.to_string());
        }

        guard.entries = Some(entries);
        UndoResult::ok()
    }
}

/// Pick `original` if it's free, else `{base}_restored{ext}`, `_restored_2`,
/// `_restored_3`, … until an unoccupied path is found.
async fn restore_target(original: &Path) -> Result<PathBuf> {
    if !path_exists(original).await? {
        return Ok(original.to_path_buf());
    }
    let dir = original.parent().unwrap_or_else(|| Path::new(""));
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let first = dir.join(format!("{stem}_restored{ext}"));
    if !path_exists(&first).await? {
        return Ok(first);
    }
    for n in 2.. {
        let candidate = dir.join(format!("{stem}_restored_{n}{ext}"));
        if !path_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    unreachable!("unbounded counter always finds a free slot")
}

async fn path_exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(JournalError::Io {
            path: path.to_path_buf(),
            source: e,
        }
        .into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_then_read_back_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path().join("journal.ndjson"));
        store
            .record(PathBuf::from("/a/src.png"), PathBuf::from("/a/dst.png"), 100)
            .await
            .unwrap();
        let on_disk = tokio::fs::read_to_string(dir.path().join("journal.ndjson"))
            .await
            .unwrap();
        assert_eq!(on_disk.lines().count(), 1);
    }

    #[tokio::test]
    async fn undo_on_empty_journal_reports_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JournalStore::new(dir.path().join("journal.ndjson"));
        let result = store.undo().await;
        assert_eq!(result, UndoResult::failed("empty"));
    }

    #[tokio::test]
    async fn undo_restores_file_and_pops_entry() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        let dst = dir.path().join("dst.png");
        tokio::fs::write(&dst, b"data").await.unwrap();

        let store = JournalStore::new(dir.path().join("journal.ndjson"));
        store.record(src.clone(), dst.clone(), 100).await.unwrap();

        let result = store.undo().await;
        assert!(result.ok);
        assert!(tokio::fs::try_exists(&src).await.unwrap());
        assert!(!tokio::fs::try_exists(&dst).await.unwrap());

        let on_disk = tokio::fs::read_to_string(dir.path().join("journal.ndjson"))
            .await
            .unwrap();
        assert!(on_disk.is_empty());
    }

    #[tokio::test]
    async fn undo_suffixes_restored_name_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.png");
        let dst = dir.path().join("dst.png");
        tokio::fs::write(&src, b"occupied").await.unwrap();
        tokio::fs::write(&dst, b"data").await.unwrap();

        let store = JournalStore::new(dir.path().join("journal.ndjson"));
        store.record(src.clone(), dst.clone(), 100).await.unwrap();

        let result = store.undo().await;
        assert!(result.ok);
        assert!(tokio::fs::try_exists(dir.path().join("src_restored.png"))
            .await
            .unwrap());
    }
}
