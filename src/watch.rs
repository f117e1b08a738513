//! Per-directory watcher abstraction. `NotifyWatchService` generalizes the
//! debounce/classify loop of a full-volume Windows indexer down to "watch
//! one non-recursive directory for stable new files": the `notify` crate's
//! own callback thread is bridged into the async world over an unbounded
//! `tokio::sync::mpsc` channel, and every candidate is gated through
//! `FsSafe::is_stable` before the caller's `on_add` is invoked.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Result, WatchError};
use crate::events::{Emitter, Unsubscribe};
use crate::fs_safe;

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub birthtime_ms: i64,
    pub mtime_ms: i64,
    pub size: u64,
}

pub type OnAdd = Arc<dyn Fn(WatchEvent) + Send + Sync>;

#[async_trait]
pub trait WatchService: Send + Sync {
    async fn start(&mut self, on_add: OnAdd) -> Result<()>;
    async fn stop(&mut self);
    fn is_healthy(&self) -> bool;
    fn on_error(&self, handler: Arc<dyn Fn(String) + Send + Sync>) -> Unsubscribe;
}

/// Default `WatchService`, backed by `notify::RecommendedWatcher`.
pub struct NotifyWatchService {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    healthy: Arc<AtomicBool>,
    error_emitter: Arc<Emitter<String>>,
    /// Paths currently being processed, to prevent overlapping filesystem
    /// events from re-entering the same path's pipeline.
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
}

impl NotifyWatchService {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            watcher: None,
            task: None,
            healthy: Arc::new(AtomicBool::new(false)),
            error_emitter: Arc::new(Emitter::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }
}

#[async_trait]
impl WatchService for NotifyWatchService {
    async fn start(&mut self, on_add: OnAdd) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| WatchError::Io {
                path: self.dir.clone(),
                source: e,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })
        .map_err(|e| WatchError::Init {
            path: self.dir.clone(),
            reason: e.to_string(),
        })?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Init {
                path: self.dir.clone(),
                reason: e.to_string(),
            })?;

        self.healthy.store(true, Ordering::SeqCst);
        let healthy = self.healthy.clone();
        let error_emitter = self.error_emitter.clone();
        let in_flight = self.in_flight.clone();
        let dir = self.dir.clone();

        let task = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Create(_)) {
                            continue;
                        }
                        for path in event.paths {
                            if !path.starts_with(&dir) {
                                continue;
                            }
                            handle_candidate(path, &in_flight, &on_add).await;
                        }
                    }
                    Err(e) => {
                        healthy.store(false, Ordering::SeqCst);
                        error_emitter.emit(e.to_string());
                    }
                }
            }
        });

        self.watcher = Some(watcher);
        self.task = Some(task);
        Ok(())
    }

    async fn stop(&mut self) {
        self.healthy.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.watcher = None;
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.watcher.is_some()
    }

    fn on_error(&self, handler: Arc<dyn Fn(String) + Send + Sync>) -> Unsubscribe {
        self.error_emitter.subscribe_shared(handler)
    }
}

async fn handle_candidate(path: PathBuf, in_flight: &Arc<Mutex<HashSet<PathBuf>>>, on_add: &OnAdd) {
    let basename = match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => return,
    };
    if basename.starts_with('.') {
        return;
    }

    {
        let mut guard = in_flight.lock().await;
        if !guard.insert(path.clone()) {
            return;
        }
    }

    let result = process_candidate(&path, on_add).await;
    in_flight.lock().await.remove(&path);
    if let Err(e) = result {
        tracing::debug!(path = %path.display(), error = %e, "watch candidate could not be processed");
    }
}

async fn process_candidate(path: &Path, on_add: &OnAdd) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Ok(()), // non-file: ignored
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()), // gone already
        Err(e) => {
            return Err(WatchError::Io {
                path: path.to_path_buf(),
                source: e,
            }
            .into())
        }
    }

    if !fs_safe::is_stable(path).await? {
        return Ok(());
    }

    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(WatchError::Io {
                path: path.to_path_buf(),
                source: e,
            }
            .into())
        }
    };

    let birthtime_ms = meta
        .created()
        .or_else(|_| meta.modified())
        .map(system_time_to_millis)
        .unwrap_or(0);
    let mtime_ms = meta.modified().map(system_time_to_millis).unwrap_or(0);

    on_add(WatchEvent {
        path: path.to_path_buf(),
        birthtime_ms,
        mtime_ms,
        size: meta.len(),
    });
    Ok(())
}

fn system_time_to_millis(t: std::time::SystemTime) -> i64 {
    match t.duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}
