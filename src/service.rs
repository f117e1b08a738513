//! Orchestrator: lifecycle, watcher supervision, profile routing, and
//! pipeline execution. This is the component every other module composes
//! under.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};

use glob::{MatchOptions, Pattern};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{Action, Config, ConfigPatch, ConfigStore, Profile};
use crate::convert::{ConversionService, ConvertOptions, ShellConversionService};
use crate::error::{NamefixError, RenameError, Result};
use crate::events::{EventBus, ServiceFileEvent, StatusEvent, ToastEvent, ToastLevel, Unsubscribe};
use crate::journal::JournalStore;
use crate::matcher::ProfileMatcher;
use crate::rename::RenameService;
use crate::template;
use crate::trash::{SystemTrashService, TrashService};
use crate::watch::{NotifyWatchService, WatchEvent, WatchService};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RESTART_ATTEMPTS: u32 = 3;
const SOURCE_EXISTS_POLL_BUDGET: Duration = Duration::from_millis(900);
const SOURCE_EXISTS_POLL_STEP: Duration = Duration::from_millis(150);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

struct WatcherEntry {
    service: Box<dyn WatchService>,
    restart_attempts: u32,
}

/// Builds the `WatchService` for a newly-watched directory. A plain field
/// (rather than a hardcoded `NotifyWatchService::new`) so tests can swap in a
/// double that drives `run_health_check`'s restart bookkeeping without
/// needing a real `notify` backend.
type WatcherFactory = Box<dyn Fn(PathBuf) -> Box<dyn WatchService> + Send + Sync>;

/// The top-level engine. Always used behind `Arc` (see `NamefixService::new`)
/// since watcher callbacks need to spawn tasks that call back into `self`.
pub struct NamefixService {
    weak_self: std::sync::OnceLock<Weak<NamefixService>>,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    config_store: Arc<ConfigStore>,
    journal: Arc<JournalStore>,
    rename_service: Arc<RenameService>,
    conversion_service: Arc<dyn ConversionService>,
    trash_service: Arc<dyn TrashService>,
    watchers: Mutex<HashMap<PathBuf, WatcherEntry>>,
    sync_lock: Mutex<()>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    pub events: Arc<EventBus>,
    watcher_factory: WatcherFactory,
}

impl NamefixService {
    /// Construct with the default `ShellConversionService`/`SystemTrashService`
    /// implementations and the default config/journal file locations.
    pub fn new() -> Arc<Self> {
        Self::with_services(
            Arc::new(ConfigStore::at_default_path()),
            Arc::new(JournalStore::at_default_path()),
            Arc::new(ShellConversionService::new("heif-convert")),
            Arc::new(SystemTrashService::new()),
        )
    }

    pub fn with_services(
        config_store: Arc<ConfigStore>,
        journal: Arc<JournalStore>,
        conversion_service: Arc<dyn ConversionService>,
        trash_service: Arc<dyn TrashService>,
    ) -> Arc<Self> {
        Self::with_services_and_watcher_factory(
            config_store,
            journal,
            conversion_service,
            trash_service,
            Box::new(|dir| Box::new(NotifyWatchService::new(dir)) as Box<dyn WatchService>),
        )
    }

    fn with_services_and_watcher_factory(
        config_store: Arc<ConfigStore>,
        journal: Arc<JournalStore>,
        conversion_service: Arc<dyn ConversionService>,
        trash_service: Arc<dyn TrashService>,
        watcher_factory: WatcherFactory,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak_self: {
                let cell = std::sync::OnceLock::new();
                let _ = cell.set(weak.clone());
                cell
            },
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            running: AtomicBool::new(false),
            config_store,
            journal,
            rename_service: Arc::new(RenameService::new()),
            conversion_service,
            trash_service,
            watchers: Mutex::new(HashMap::new()),
            sync_lock: Mutex::new(()),
            health_task: Mutex::new(None),
            events: Arc::new(EventBus::new()),
            watcher_factory,
        })
    }

    fn arc_self(&self) -> Arc<Self> {
        self.weak_self
            .get()
            .and_then(Weak::upgrade)
            .expect("NamefixService is always constructed via Arc::new_cyclic")
    }

    /// Idempotent: re-entrant calls after the first are a no-op.
    pub async fn init(&self, overrides: Option<ConfigPatch>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle != Lifecycle::Uninitialized {
            return Ok(());
        }
        self.config_store.get().await?;
        if let Some(patch) = overrides {
            self.config_store.set(patch).await?;
        }
        *lifecycle = Lifecycle::Initialized;
        drop(lifecycle);
        self.emit_status().await;
        Ok(())
    }

    async fn require_initialized(&self) -> Result<()> {
        if *self.lifecycle.lock().await == Lifecycle::Uninitialized {
            return Err(NamefixError::NotInitialized);
        }
        Ok(())
    }

    pub async fn start(&self) -> Result<()> {
        self.require_initialized().await?;
        self.running.store(true, Ordering::SeqCst);
        *self.lifecycle.lock().await = Lifecycle::Running;
        self.sync_watchers().await?;
        self.ensure_health_monitor().await;
        self.emit_status().await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.require_initialized().await?;
        self.running.store(false, Ordering::SeqCst);
        *self.lifecycle.lock().await = Lifecycle::Stopped;
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        self.sync_watchers().await?;
        self.emit_status().await;
        Ok(())
    }

    pub async fn toggle_running(&self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            self.stop().await
        } else {
            self.start().await
        }
    }

    // -----------------------------------------------------------------
    // Config mutation surface
    // -----------------------------------------------------------------

    pub async fn set_config(&self, patch: ConfigPatch) -> Result<Config> {
        let cfg = self.config_store.set(patch).await?;
        self.sync_watchers().await?;
        self.events.config.emit(cfg.clone());
        self.emit_status().await;
        Ok(cfg)
    }

    pub async fn set_dry_run(&self, dry_run: bool) -> Result<Config> {
        self.set_config(ConfigPatch {
            dry_run: Some(dry_run),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn set_launch_on_login(&self, launch_on_login: bool) -> Result<Config> {
        self.set_config(ConfigPatch {
            launch_on_login: Some(launch_on_login),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn get_profiles(&self) -> Result<Vec<Profile>> {
        Ok(self.config_store.get().await?.profiles)
    }

    pub async fn get_profile(&self, id: &str) -> Result<Option<Profile>> {
        Ok(self
            .config_store
            .get()
            .await?
            .profiles
            .into_iter()
            .find(|p| p.id == id))
    }

    pub async fn set_profile(&self, profile: Profile) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        match cfg.profiles.iter_mut().find(|p| p.id == profile.id) {
            Some(existing) => *existing = profile,
            None => cfg.profiles.push(profile),
        }
        self.set_config(ConfigPatch {
            profiles: Some(cfg.profiles),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn delete_profile(&self, id: &str) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        cfg.profiles.retain(|p| p.id != id);
        self.set_config(ConfigPatch {
            profiles: Some(cfg.profiles),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn toggle_profile(&self, id: &str) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        if let Some(p) = cfg.profiles.iter_mut().find(|p| p.id == id) {
            p.enabled = !p.enabled;
        }
        self.set_config(ConfigPatch {
            profiles: Some(cfg.profiles),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn reorder_profiles(&self, ordered_ids: &[String]) -> Result<Config> {
        let cfg = self.config_store.get().await?;
        let mut reordered = Vec::with_capacity(cfg.profiles.len());
        for id in ordered_ids {
            if let Some(p) = cfg.profiles.iter().find(|p| &p.id == id) {
                reordered.push(p.clone());
            }
        }
        for p in &cfg.profiles {
            if !reordered.iter().any(|r| r.id == p.id) {
                reordered.push(p.clone());
            }
        }
        for (i, p) in reordered.iter_mut().enumerate() {
            p.priority = i as i32;
        }
        self.set_config(ConfigPatch {
            profiles: Some(reordered),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn add_watch_dir(&self, dir: PathBuf) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        if !cfg.watch_dirs.contains(&dir) {
            cfg.watch_dirs.push(dir);
        }
        self.set_config(ConfigPatch {
            watch_dirs: Some(cfg.watch_dirs),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn remove_watch_dir(&self, dir: &Path) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        cfg.watch_dirs.retain(|d| d != dir);
        self.set_config(ConfigPatch {
            watch_dirs: Some(cfg.watch_dirs),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn set_primary_watch_dir(&self, dir: PathBuf) -> Result<Config> {
        let mut cfg = self.config_store.get().await?;
        cfg.watch_dirs.retain(|d| d != &dir);
        cfg.watch_dirs.insert(0, dir);
        self.set_config(ConfigPatch {
            watch_dirs: Some(cfg.watch_dirs),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn set_watch_dirs(&self, dirs: Vec<PathBuf>) -> Result<Config> {
        self.set_config(ConfigPatch {
            watch_dirs: Some(dirs),
            ..ConfigPatch::default()
        })
        .await
    }

    pub async fn get_status(&self) -> Result<StatusEvent> {
        let cfg = self.config_store.get().await?;
        let watchers = self.watchers.lock().await;
        Ok(StatusEvent {
            running: self.running.load(Ordering::SeqCst) && !watchers.is_empty(),
            directories: cfg.watch_dirs,
            dry_run: cfg.dry_run,
            launch_on_login: cfg.launch_on_login,
        })
    }

    pub async fn undo_last(&self) -> crate::journal::UndoResult {
        self.journal.undo().await
    }

    async fn emit_status(&self) {
        if let Ok(status) = self.get_status().await {
            self.events.status.emit(status);
        }
    }

    // -----------------------------------------------------------------
    // Watcher supervision
    // -----------------------------------------------------------------

    /// Serialized under `sync_lock` (a `tokio::sync::Mutex` queues waiters
    /// FIFO) so overlapping config changes apply sequentially, never
    /// interleaved.
    async fn sync_watchers(&self) -> Result<()> {
        let _guard = self.sync_lock.lock().await;

        let desired: Vec<PathBuf> = if self.running.load(Ordering::SeqCst) {
            self.config_store.get().await?.watch_dirs
        } else {
            Vec::new()
        };

        let to_remove: Vec<PathBuf> = {
            let watchers = self.watchers.lock().await;
            watchers
                .keys()
                .filter(|k| !desired.contains(k))
                .cloned()
                .collect()
        };

        let stops = to_remove.into_iter().map(|dir| {
            let watchers = &self.watchers;
            async move {
                if let Some(mut entry) = watchers.lock().await.remove(&dir) {
                    entry.service.stop().await;
                }
            }
        });
        futures::future::join_all(stops).await;

        for dir in &desired {
            let already_running = self.watchers.lock().await.contains_key(dir);
            if already_running {
                continue;
            }
            if let Err(e) = self.start_watcher(dir.clone()).await {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to start watcher");
                self.events.toast.emit(ToastEvent {
                    message: format!("Could not watch {}: {e}", dir.display()),
                    level: ToastLevel::Warn,
                });
            }
        }

        Ok(())
    }

    async fn start_watcher(&self, dir: PathBuf) -> Result<()> {
        let mut service = (self.watcher_factory)(dir.clone());

        let weak = self.weak_self.get().cloned().expect("initialized");
        let dir_for_error = dir.clone();
        service.on_error(Arc::new(move |message: String| {
            if let Some(svc) = weak.upgrade() {
                let dir = dir_for_error.clone();
                tokio::spawn(async move {
                    tracing::warn!(dir = %dir.display(), %message, "watcher error");
                    svc.events.toast.emit(ToastEvent {
                        message: format!("Watcher error on {}: {message}", dir.display()),
                        level: ToastLevel::Warn,
                    });
                });
            }
        }));

        let weak = self.weak_self.get().cloned().expect("initialized");
        let dir_for_event = dir.clone();
        service
            .start(Arc::new(move |ev: WatchEvent| {
                if let Some(svc) = weak.upgrade() {
                    let dir = dir_for_event.clone();
                    tokio::spawn(async move {
                        svc.handle_watch_event(dir, ev).await;
                    });
                }
            }))
            .await?;

        self.watchers.lock().await.insert(
            dir,
            WatcherEntry {
                service,
                restart_attempts: 0,
            },
        );
        Ok(())
    }

    async fn ensure_health_monitor(&self) {
        let mut guard = self.health_task.lock().await;
        if guard.is_some() {
            return;
        }
        let weak = self.weak_self.get().cloned().expect("initialized");
        *guard = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            loop {
                interval.tick().await;
                let Some(svc) = weak.upgrade() else { break };
                svc.run_health_check().await;
            }
        }));
    }

    async fn run_health_check(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let dirs: Vec<PathBuf> = self.watchers.lock().await.keys().cloned().collect();
        for dir in dirs {
            let accessible = tokio::fs::metadata(&dir)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            let healthy = {
                let watchers = self.watchers.lock().await;
                watchers
                    .get(&dir)
                    .map(|e| e.service.is_healthy())
                    .unwrap_or(false)
            };
            if healthy && accessible {
                if let Some(entry) = self.watchers.lock().await.get_mut(&dir) {
                    entry.restart_attempts = 0;
                }
                continue;
            }

            let attempts = {
                let mut watchers = self.watchers.lock().await;
                if let Some(entry) = watchers.get_mut(&dir) {
                    entry.restart_attempts += 1;
                    entry.restart_attempts
                } else {
                    continue;
                }
            };

            if let Some(mut entry) = self.watchers.lock().await.remove(&dir) {
                entry.service.stop().await;
            }

            if attempts > MAX_RESTART_ATTEMPTS {
                self.events.toast.emit(ToastEvent {
                    message: format!(
                        "Watcher for {} failed repeatedly and has been disabled",
                        dir.display()
                    ),
                    level: ToastLevel::Error,
                });
                continue;
            }

            if let Err(e) = self.start_watcher(dir.clone()).await {
                tracing::warn!(dir = %dir.display(), error = %e, "watcher restart failed");
            } else if let Some(entry) = self.watchers.lock().await.get_mut(&dir) {
                entry.restart_attempts = attempts;
            }
        }
    }

    // -----------------------------------------------------------------
    // Event handling pipelines
    // -----------------------------------------------------------------

    async fn handle_watch_event(&self, dir: PathBuf, ev: WatchEvent) {
        let cfg = match self.config_store.get().await {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!(error = %e, "failed to load config while handling watch event");
                return;
            }
        };

        let basename = match ev.path.file_name() {
            Some(name) => name.to_string_lossy().to_string(),
            None => return,
        };

        let matcher = ProfileMatcher::build(&cfg.profiles);
        let profile = match matcher.find_match(&basename) {
            Some(p) => Some(p.clone()),
            None => self.legacy_fallback(&basename, &cfg),
        };

        let Some(profile) = profile else { return };
        let birthtime = template::system_time_from_millis(ev.birthtime_ms);

        match profile.action {
            Action::Rename => {
                self.run_rename_pipeline(&dir, &ev.path, birthtime, &profile, cfg.dry_run)
                    .await;
            }
            Action::Convert => {
                self.run_convert_pipeline(&dir, &ev.path, &profile, cfg.dry_run)
                    .await;
            }
            Action::RenameConvert => {
                self.run_rename_convert_pipeline(&dir, &ev.path, birthtime, &profile, cfg.dry_run)
                    .await;
            }
        }
    }

    /// Migration-only fallback: when no profile matches, honor the legacy
    /// `include`/`exclude` glob lists against a synthetic rename profile.
    fn legacy_fallback(&self, basename: &str, cfg: &Config) -> Option<Profile> {
        let prefix = cfg.prefix.as_deref().filter(|p| !p.is_empty())?;
        if cfg.include.is_empty() {
            return None;
        }
        let opts = MatchOptions {
            case_sensitive: false,
            require_literal_separator: false,
            require_literal_leading_dot: true,
        };
        let included = cfg
            .include
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches_with(basename, opts));
        if !included {
            return None;
        }
        let excluded = cfg
            .exclude
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches_with(basename, opts));
        if excluded {
            return None;
        }
        let mut fallback = Profile::builtin("legacy-fallback", "Legacy", "*", i32::MAX, Action::Rename);
        fallback.prefix = prefix.to_string();
        fallback.template = template::LEGACY_TEMPLATE.to_string();
        Some(fallback)
    }

    async fn run_rename_pipeline(
        &self,
        dir: &Path,
        src: &Path,
        birthtime: SystemTime,
        profile: &Profile,
        dry_run: bool,
    ) {
        let basename = src.file_name().unwrap_or_default().to_string_lossy().to_string();
        if !self.rename_service.needs_rename_for_profile(&basename, profile) {
            self.events.file.emit(ServiceFileEvent::Skipped {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                message: "idempotent".to_string(),
            });
            return;
        }

        let reserved = self
            .rename_service
            .target_for_profile(src, birthtime, profile)
            .await;

        if dry_run {
            self.events.file.emit(ServiceFileEvent::Preview {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                target: reserved.filename.clone(),
            });
            self.rename_service.release(&reserved.dir, &reserved.filename).await;
            return;
        }

        if !self.wait_for_source(src).await {
            let err = RenameError::SourceMissing { path: src.to_path_buf() };
            tracing::warn!(path = %src.display(), error = %err, "source disappeared before rename");
            self.rename_service.release(&reserved.dir, &reserved.filename).await;
            return;
        }

        let dest = reserved.path();
        match crate::fs_safe::atomic_rename(src, &dest).await {
            Ok(()) => {
                let _ = self
                    .journal
                    .record(src.to_path_buf(), dest.clone(), now_ms())
                    .await;
                self.events.file.emit(ServiceFileEvent::Applied {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                    target: reserved.filename.clone(),
                });
            }
            Err(e) => {
                self.events.file.emit(ServiceFileEvent::Error {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                    message: e.to_string(),
                });
            }
        }
        self.rename_service.release(&reserved.dir, &reserved.filename).await;
    }

    async fn run_convert_pipeline(&self, dir: &Path, src: &Path, profile: &Profile, dry_run: bool) {
        let ext = src
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        if !self.conversion_service.can_convert(&ext) {
            self.events.file.emit(ServiceFileEvent::Skipped {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                message: "unsupported format".to_string(),
            });
            return;
        }

        if dry_run {
            let stem = src
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            self.events.file.emit(ServiceFileEvent::Preview {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                target: format!("{stem}.jpeg"),
            });
            return;
        }

        let _ = profile;
        match self
            .conversion_service
            .convert(
                src,
                ConvertOptions {
                    output_format: "jpeg".to_string(),
                    ..ConvertOptions::default()
                },
            )
            .await
        {
            Ok(outcome) => {
                let _ = self
                    .journal
                    .record(src.to_path_buf(), outcome.dest_path.clone(), now_ms())
                    .await;
                self.events.file.emit(ServiceFileEvent::Converted {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                    format: outcome.format,
                });
                self.trash_original(dir, src).await;
            }
            Err(e) => {
                self.events.file.emit(ServiceFileEvent::ConvertError {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                    message: e.to_string(),
                });
            }
        }
    }

    async fn run_rename_convert_pipeline(
        &self,
        dir: &Path,
        src: &Path,
        birthtime: SystemTime,
        profile: &Profile,
        dry_run: bool,
    ) {
        let ext = src
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.conversion_service.can_convert(&ext) {
            self.events.file.emit(ServiceFileEvent::Skipped {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                message: "unsupported format".to_string(),
            });
            return;
        }

        if dry_run {
            let ctx = template::TemplateContext::new(src, birthtime, profile.prefix.clone());
            let mut preview = template::expand(&profile.template, &ctx);
            if !profile.template.contains("<ext>") {
                preview = preview.trim_end_matches(ctx.ext.as_str()).to_string();
                preview.push_str(".jpeg");
            }
            self.events.file.emit(ServiceFileEvent::Preview {
                file: src.to_path_buf(),
                directory: dir.to_path_buf(),
                timestamp: now_ms(),
                target: preview,
            });
            return;
        }

        let converted = match self
            .conversion_service
            .convert(
                src,
                ConvertOptions {
                    output_format: "jpeg".to_string(),
                    ..ConvertOptions::default()
                },
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                self.events.file.emit(ServiceFileEvent::ConvertError {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                    message: e.to_string(),
                });
                return;
            }
        };

        let _ = self
            .journal
            .record(src.to_path_buf(), converted.dest_path.clone(), now_ms())
            .await;

        self.events.file.emit(ServiceFileEvent::Converted {
            file: src.to_path_buf(),
            directory: dir.to_path_buf(),
            timestamp: now_ms(),
            format: converted.format.clone(),
        });

        self.run_rename_pipeline(dir, &converted.dest_path, birthtime, profile, false)
            .await;

        self.trash_original(dir, src).await;
    }

    async fn trash_original(&self, dir: &Path, src: &Path) {
        match self.trash_service.move_to_trash(src).await {
            Ok(outcome) if outcome.success => {
                self.events.file.emit(ServiceFileEvent::Trashed {
                    file: src.to_path_buf(),
                    directory: dir.to_path_buf(),
                    timestamp: now_ms(),
                });
            }
            Ok(outcome) => {
                self.events.toast.emit(ToastEvent {
                    message: format!(
                        "Could not trash original {}: {}",
                        src.display(),
                        outcome.error.unwrap_or_default()
                    ),
                    level: ToastLevel::Warn,
                });
            }
            Err(e) => {
                self.events.toast.emit(ToastEvent {
                    message: format!("Could not trash original {}: {e}", src.display()),
                    level: ToastLevel::Warn,
                });
            }
        }
    }

    /// Poll up to ~900ms (150ms steps) for `src` to still exist before a
    /// rename; the file may have been moved/deleted by another actor between
    /// the stability check and here.
    async fn wait_for_source(&self, src: &Path) -> bool {
        let attempts = SOURCE_EXISTS_POLL_BUDGET.as_millis() / SOURCE_EXISTS_POLL_STEP.as_millis();
        for _ in 0..attempts {
            if tokio::fs::try_exists(src).await.unwrap_or(false) {
                return true;
            }
            tokio::time::sleep(SOURCE_EXISTS_POLL_STEP).await;
        }
        tokio::fs::try_exists(src).await.unwrap_or(false)
    }

    pub fn on_file<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(ServiceFileEvent) + Send + Sync + 'static,
    {
        self.events.file.subscribe(handler)
    }

    pub fn on_status<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(StatusEvent) + Send + Sync + 'static,
    {
        self.events.status.subscribe(handler)
    }

    pub fn on_config<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        self.events.config.subscribe(handler)
    }

    pub fn on_toast<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(ToastEvent) + Send + Sync + 'static,
    {
        self.events.toast.subscribe(handler)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::convert::ConvertOutcome;
    use crate::trash::TrashOutcome;
    use crate::watch::OnAdd;

    struct NoopConverter;

    #[async_trait]
    impl ConversionService for NoopConverter {
        async fn convert(&self, src_path: &Path, _opts: ConvertOptions) -> Result<ConvertOutcome> {
            Ok(ConvertOutcome {
                src_path: src_path.to_path_buf(),
                dest_path: src_path.to_path_buf(),
                format: "jpeg".to_string(),
                duration_ms: 0,
            })
        }
    }

    struct NoopTrash;

    #[async_trait]
    impl TrashService for NoopTrash {
        async fn move_to_trash(&self, path: &Path) -> Result<TrashOutcome> {
            Ok(TrashOutcome {
                src_path: path.to_path_buf(),
                success: true,
                error: None,
            })
        }
    }

    /// Always reports unhealthy but starts/stops without touching the
    /// filesystem, so `run_health_check`'s restart bookkeeping can be driven
    /// directly without waiting on `HEALTH_CHECK_INTERVAL` or a real `notify`
    /// backend.
    struct AlwaysUnhealthyWatcher;

    #[async_trait]
    impl WatchService for AlwaysUnhealthyWatcher {
        async fn start(&mut self, _on_add: OnAdd) -> Result<()> {
            Ok(())
        }

        async fn stop(&mut self) {}

        fn is_healthy(&self) -> bool {
            false
        }

        fn on_error(&self, _handler: Arc<dyn Fn(String) + Send + Sync>) -> Unsubscribe {
            crate::events::Emitter::<String>::new().subscribe(|_| {})
        }
    }

    fn basic_service(dir: &Path) -> Arc<NamefixService> {
        NamefixService::with_services(
            Arc::new(ConfigStore::new(dir.join("config.json"))),
            Arc::new(JournalStore::new(dir.join("journal.ndjson"))),
            Arc::new(NoopConverter),
            Arc::new(NoopTrash),
        )
    }

    fn service_with_fake_watcher(dir: &Path) -> Arc<NamefixService> {
        NamefixService::with_services_and_watcher_factory(
            Arc::new(ConfigStore::new(dir.join("config.json"))),
            Arc::new(JournalStore::new(dir.join("journal.ndjson"))),
            Arc::new(NoopConverter),
            Arc::new(NoopTrash),
            Box::new(|_dir| Box::new(AlwaysUnhealthyWatcher) as Box<dyn WatchService>),
        )
    }

    #[tokio::test]
    async fn operations_before_init_return_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let service = basic_service(dir.path());
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, NamefixError::NotInitialized));
    }

    #[tokio::test]
    async fn profile_crud_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = basic_service(dir.path());
        service.init(None).await.unwrap();

        let profile = Profile {
            id: "custom".to_string(),
            name: "Custom".to_string(),
            enabled: true,
            pattern: "*.custom".to_string(),
            is_regex: false,
            template: "<prefix>_<datetime>".to_string(),
            prefix: "Custom".to_string(),
            priority: 50,
            action: Action::Rename,
        };
        service.set_profile(profile.clone()).await.unwrap();
        let fetched = service.get_profile("custom").await.unwrap().unwrap();
        assert_eq!(fetched.pattern, "*.custom");

        service.toggle_profile("custom").await.unwrap();
        let toggled = service.get_profile("custom").await.unwrap().unwrap();
        assert!(!toggled.enabled);

        service.delete_profile("custom").await.unwrap();
        assert!(service.get_profile("custom").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reorder_profiles_assigns_sequential_priority() {
        let dir = tempfile::tempdir().unwrap();
        let service = basic_service(dir.path());
        service.init(None).await.unwrap();

        let ids: Vec<String> = service
            .get_profiles()
            .await
            .unwrap()
            .iter()
            .map(|p| p.id.clone())
            .collect();
        let mut reversed = ids.clone();
        reversed.reverse();

        service.reorder_profiles(&reversed).await.unwrap();
        let reordered = service.get_profiles().await.unwrap();
        assert_eq!(reordered[0].id, reversed[0]);
        assert_eq!(reordered[0].priority, 0);
    }

    #[tokio::test]
    async fn watch_dir_crud_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let service = basic_service(dir.path());
        service.init(None).await.unwrap();

        let a = dir.path().join("a");
        let b = dir.path().join("b");
        service.add_watch_dir(a.clone()).await.unwrap();
        service.add_watch_dir(b.clone()).await.unwrap();
        let status = service.get_status().await.unwrap();
        assert_eq!(status.directories, vec![a.clone(), b.clone()]);

        service.set_primary_watch_dir(b.clone()).await.unwrap();
        let status = service.get_status().await.unwrap();
        assert_eq!(status.directories[0], b);

        service.remove_watch_dir(&a).await.unwrap();
        let status = service.get_status().await.unwrap();
        assert!(!status.directories.contains(&a));

        service.set_watch_dirs(vec![a.clone()]).await.unwrap();
        let status = service.get_status().await.unwrap();
        assert_eq!(status.directories, vec![a]);
    }

    #[tokio::test]
    async fn health_check_restarts_up_to_cap_then_emits_permanent_failure_toast() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with_fake_watcher(dir.path());
        service.init(None).await.unwrap();

        let watch_dir = dir.path().join("watched");
        service.start_watcher(watch_dir.clone()).await.unwrap();
        service.running.store(true, Ordering::SeqCst);

        let toasts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let t2 = toasts.clone();
        service.on_toast(move |t| t2.lock().unwrap().push(t));

        for _ in 0..MAX_RESTART_ATTEMPTS {
            service.run_health_check().await;
            assert!(service.watchers.lock().await.contains_key(&watch_dir));
        }

        // One more tick pushes the attempt count past the cap: the watcher is
        // disabled (no further restart) and a permanent-failure toast fires.
        service.run_health_check().await;
        assert!(!service.watchers.lock().await.contains_key(&watch_dir));

        let seen = toasts.lock().unwrap();
        assert!(seen
            .iter()
            .any(|t| t.level == ToastLevel::Error && t.message.contains("disabled")));

        // Further health checks find nothing left to restart for that
        // directory; no additional toast fires.
        let toasts_before = seen.len();
        drop(seen);
        service.run_health_check().await;
        assert_eq!(toasts.lock().unwrap().len(), toasts_before);
    }
}
