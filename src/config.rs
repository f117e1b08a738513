//! Validated, persisted configuration with change subscription.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ConfigError, Result};
use crate::events::Emitter;
use crate::paths;
use crate::template::{self, BUILTIN_PROFILE_IDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Rename,
    Convert,
    #[serde(rename = "rename+convert")]
    RenameConvert,
}

impl Default for Action {
    fn default() -> Self {
        Self::Rename
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub pattern: String,
    #[serde(default, rename = "isRegex")]
    pub is_regex: bool,
    pub template: String,
    #[serde(default)]
    pub prefix: String,
    pub priority: i32,
    #[serde(default)]
    pub action: Action,
}

fn default_true() -> bool {
    true
}

impl Profile {
    pub(crate) fn builtin(id: &str, name: &str, pattern: &str, priority: i32, action: Action) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
            pattern: pattern.to_string(),
            is_regex: false,
            template: template::LEGACY_TEMPLATE.to_string(),
            prefix: name.to_string(),
            priority,
            action,
        }
    }
}

/// The three profiles that must appear in every valid config, re-injected at
/// load time if missing (matched by id).
pub fn default_profiles() -> Vec<Profile> {
    vec![
        Profile::builtin("heic-convert", "HEIC Convert", "*.heic", 0, Action::Convert),
        Profile::builtin("screenshots", "Screenshots", "Screenshot*", 1, Action::Rename),
        Profile::builtin(
            "screen-recordings",
            "Screen Recordings",
            "Screen Recording*",
            2,
            Action::Rename,
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub watch_dir: Option<PathBuf>,
    pub watch_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub launch_on_login: bool,
    #[serde(default, deserialize_with = "deserialize_profiles_permissively")]
    pub profiles: Vec<Profile>,
}

fn default_theme() -> String {
    "system".to_string()
}

/// Each profile entry is deserialized independently so a single profile with
/// a malformed `action` tag (or any other bad field) doesn't fail the whole
/// config document: only that entry is dropped, the rest still parses.
fn deserialize_profiles_permissively<'de, D>(
    deserializer: D,
) -> std::result::Result<Vec<Profile>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    let mut profiles = Vec::with_capacity(raw.len());
    for value in raw {
        let id = value
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown>")
            .to_string();
        match serde_json::from_value::<Profile>(value) {
            Ok(profile) => profiles.push(profile),
            Err(e) => {
                tracing::warn!(profile = %id, error = %e, "dropping profile with invalid fields");
            }
        }
    }
    Ok(profiles)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: None,
            watch_dirs: Vec::new(),
            prefix: None,
            include: Vec::new(),
            exclude: Vec::new(),
            dry_run: false,
            theme: default_theme(),
            launch_on_login: false,
            profiles: default_profiles(),
        }
    }
}

/// Raw partial update accepted by `ConfigStore::set`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub watch_dir: Option<PathBuf>,
    pub watch_dirs: Option<Vec<PathBuf>>,
    pub dry_run: Option<bool>,
    pub theme: Option<String>,
    pub launch_on_login: Option<bool>,
    pub profiles: Option<Vec<Profile>>,
}

impl Config {
    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(v) = patch.watch_dir {
            self.watch_dir = Some(v);
        }
        if let Some(v) = patch.watch_dirs {
            self.watch_dirs = v;
        }
        if let Some(v) = patch.dry_run {
            self.dry_run = v;
        }
        if let Some(v) = patch.theme {
            self.theme = v;
        }
        if let Some(v) = patch.launch_on_login {
            self.launch_on_login = v;
        }
        if let Some(v) = patch.profiles {
            self.profiles = v;
        }
    }

    /// Normalize and validate in place, following `spec.md` §3/§4.9/§9:
    /// - `watchDirs` trimmed, resolved absolute, deduped preserving order.
    /// - `watchDir` forced to `watchDirs[0]` when unset.
    /// - legacy `prefix`/`include` migrated into synthesized profiles when
    ///   `profiles` is empty.
    /// - missing default profiles re-injected.
    /// - a profile with an invalid `action` tag is rejected at
    ///   deserialization (see `deserialize_profiles_permissively`), so by the
    ///   time `validate` runs every surviving profile has a well-formed
    ///   shape; `validate` additionally rejects the whole config, via
    ///   `ConfigError::Invalid`, if two profiles share an `id` or a profile's
    ///   `id` is empty.
    pub fn validate(&mut self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        let mut normalized = Vec::new();
        for dir in self
            .watch_dir
            .iter()
            .cloned()
            .chain(self.watch_dirs.drain(..))
        {
            let s = dir.to_string_lossy();
            let resolved = paths::normalize(s.trim());
            if !paths::is_valid_watch_dir(&resolved) {
                continue;
            }
            if seen.insert(resolved.clone()) {
                normalized.push(resolved);
            }
        }
        self.watch_dirs = normalized;
        self.watch_dir = self.watch_dirs.first().cloned();

        if self.profiles.is_empty() {
            self.profiles = migrate_legacy(self.prefix.as_deref(), &self.include);
        }

        reinject_missing_defaults(&mut self.profiles);

        let mut seen_ids = std::collections::HashSet::new();
        for profile in &self.profiles {
            if profile.id.trim().is_empty() {
                return Err(ConfigError::Invalid("profile id must not be empty".to_string()).into());
            }
            if !seen_ids.insert(profile.id.clone()) {
                return Err(
                    ConfigError::Invalid(format!("duplicate profile id '{}'", profile.id)).into(),
                );
            }
        }

        Ok(())
    }
}

fn reinject_missing_defaults(profiles: &mut Vec<Profile>) {
    for default in default_profiles() {
        if !profiles.iter().any(|p| p.id == default.id) {
            profiles.push(default);
        }
    }
}

/// Migration path for legacy configs (`spec.md` §9): one profile per
/// `include` pattern, named from `prefix`, using the legacy fixed template.
fn migrate_legacy(prefix: Option<&str>, include: &[String]) -> Vec<Profile> {
    let Some(prefix) = prefix.filter(|p| !p.is_empty()) else {
        return Vec::new();
    };
    if include.is_empty() {
        return Vec::new();
    }
    include
        .iter()
        .enumerate()
        .map(|(i, pattern)| Profile {
            id: format!("legacy-{i}"),
            name: format!("Legacy {prefix}"),
            enabled: true,
            pattern: pattern.clone(),
            is_regex: false,
            template: template::LEGACY_TEMPLATE.to_string(),
            prefix: prefix.to_string(),
            priority: 100 + i as i32,
            action: Action::Rename,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// ConfigStore
// ---------------------------------------------------------------------------

struct Inner {
    config: Option<Config>,
}

/// Validated, persisted configuration with change subscription.
///
/// First `get()` reads `config.json`; on a missing file or a structural
/// validation failure, defaults are returned and (for "missing file" only)
/// written back atomically — a parse/validation failure leaves the on-disk
/// file untouched so it can be repaired by hand.
pub struct ConfigStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    on_change: Emitter<Config>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner { config: None }),
            on_change: Emitter::new(),
        }
    }

    pub fn at_default_path() -> Self {
        Self::new(paths::config_file())
    }

    pub async fn get(&self) -> Result<Config> {
        let mut guard = self.inner.lock().await;
        if let Some(cfg) = &guard.config {
            return Ok(cfg.clone());
        }
        let loaded = self.load_or_default().await?;
        guard.config = Some(loaded.clone());
        Ok(loaded)
    }

    async fn load_or_default(&self) -> Result<Config> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<Config>(&contents) {
                Ok(mut cfg) => match cfg.validate() {
                    Ok(()) => Ok(cfg),
                    Err(e) => {
                        tracing::warn!(path = %self.path.display(), error = %e, "config failed validation; using defaults without overwriting file");
                        Ok(Config::default())
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "config failed to parse; using defaults without overwriting file");
                    Ok(Config::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut defaults = Config::default();
                defaults.validate()?;
                self.persist(&defaults).await?;
                Ok(defaults)
            }
            Err(e) => Err(ConfigError::Io {
                path: self.path.clone(),
                source: e,
            }
            .into()),
        }
    }

    /// Merge `patch` into the current config, validate, persist, cache, and
    /// broadcast to subscribers.
    pub async fn set(&self, patch: ConfigPatch) -> Result<Config> {
        let mut guard = self.inner.lock().await;
        let mut cfg = match guard.config.clone() {
            Some(cfg) => cfg,
            None => self.load_or_default().await?,
        };
        cfg.apply_patch(patch);
        cfg.validate()?;
        self.persist(&cfg).await?;
        guard.config = Some(cfg.clone());
        drop(guard);
        self.on_change.emit(cfg.clone());
        Ok(cfg)
    }

    async fn persist(&self, cfg: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ConfigError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
        let json = serde_json::to_string_pretty(cfg).map_err(ConfigError::Serialize)?;
        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(|e| ConfigError::Io {
                path: tmp_path.clone(),
                source: e,
            })?;
        set_owner_only_permissions(&tmp_path).await;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| ConfigError::Io {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }

    /// Subscribe to config changes; `cb` is delivered eagerly with the
    /// current value if one is already cached.
    pub async fn on_change<F>(&self, cb: F) -> crate::events::Unsubscribe
    where
        F: Fn(Config) + Send + Sync + 'static,
    {
        let cb = Arc::new(cb);
        let handle = self.on_change.subscribe_shared(cb.clone());
        if let Some(cfg) = self.inner.lock().await.config.clone() {
            cb(cfg);
        }
        handle
    }
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = tokio::fs::metadata(path).await {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = tokio::fs::set_permissions(path, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &std::path::Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn default_profiles_cover_every_builtin_id_exactly_once() {
        let ids: Vec<&str> = default_profiles().iter().map(|p| p.id.as_str()).collect();
        for builtin in BUILTIN_PROFILE_IDS {
            assert_eq!(ids.iter().filter(|id| *id == builtin).count(), 1);
        }
    }

    #[test]
    fn validate_dedupes_watch_dirs_and_resolves_watch_dir() {
        let mut cfg = Config {
            watch_dir: Some(PathBuf::from("/tmp/a")),
            watch_dirs: vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b"), PathBuf::from("/tmp/a")],
            ..Config::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.watch_dirs, vec![PathBuf::from("/tmp/a"), PathBuf::from("/tmp/b")]);
        assert_eq!(cfg.watch_dir, Some(cfg.watch_dirs[0].clone()));
    }

    #[test]
    fn validate_drops_relative_watch_dirs() {
        let mut cfg = Config {
            watch_dirs: vec![PathBuf::from("relative/dir"), PathBuf::from("/tmp/ok")],
            ..Config::default()
        };
        cfg.validate().unwrap();
        assert_eq!(cfg.watch_dirs, vec![PathBuf::from("/tmp/ok")]);
    }

    #[test]
    fn validate_reinjects_missing_default_profiles() {
        let mut cfg = Config {
            profiles: vec![Profile::builtin(
                "heic-convert",
                "HEIC Convert",
                "*.heic",
                0,
                Action::Convert,
            )],
            ..Config::default()
        };
        cfg.validate().unwrap();
        let ids: Vec<&str> = cfg.profiles.iter().map(|p| p.id.as_str()).collect();
        for builtin in BUILTIN_PROFILE_IDS {
            assert!(ids.contains(builtin));
        }
    }

    #[test]
    fn validate_migrates_legacy_prefix_and_include_when_profiles_empty() {
        let mut cfg = Config {
            prefix: Some("Screenshot".to_string()),
            include: vec!["Screenshot*".to_string()],
            profiles: Vec::new(),
            ..Config::default()
        };
        cfg.validate().unwrap();
        assert!(cfg.profiles.iter().any(|p| p.id == "legacy-0"));
    }

    #[test]
    fn profile_with_invalid_action_tag_is_dropped_not_the_whole_document() {
        let json = r#"{
            "watchDir": null,
            "watchDirs": ["/tmp/photos"],
            "profiles": [
                {"id": "good", "name": "Good", "pattern": "*.png", "template": "<prefix>", "priority": 0, "action": "rename"},
                {"id": "bad", "name": "Bad", "pattern": "*.jpg", "template": "<prefix>", "priority": 1, "action": "bogus-tag"}
            ]
        }"#;
        let mut cfg: Config = serde_json::from_str(json).unwrap();
        assert!(cfg.profiles.iter().any(|p| p.id == "good"));
        assert!(!cfg.profiles.iter().any(|p| p.id == "bad"));
        cfg.validate().unwrap();
        assert_eq!(cfg.watch_dirs, vec![PathBuf::from("/tmp/photos")]);
    }

    #[test]
    fn validate_rejects_duplicate_profile_ids() {
        let mut cfg = Config {
            profiles: vec![
                Profile::builtin("dup", "First", "*.a", 0, Action::Rename),
                Profile::builtin("dup", "Second", "*.b", 1, Action::Rename),
            ],
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, crate::error::NamefixError::Config(ConfigError::Invalid(_))));
    }

    #[tokio::test]
    async fn load_or_default_writes_defaults_on_first_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(path.clone());
        let cfg = store.get().await.unwrap();
        assert_eq!(cfg.profiles.len(), default_profiles().len());
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }

    #[tokio::test]
    async fn load_or_default_falls_back_without_overwriting_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, b"not json").await.unwrap();
        let store = ConfigStore::new(path.clone());
        let cfg = store.get().await.unwrap();
        assert_eq!(cfg.theme, "system");
        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(on_disk, "not json");
    }

    #[tokio::test]
    async fn set_persists_and_emits_to_subscribers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(path.clone());
        store.get().await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        store
            .on_change(move |cfg| {
                if cfg.dry_run {
                    seen2.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        let patch = ConfigPatch {
            dry_run: Some(true),
            ..ConfigPatch::default()
        };
        let cfg = store.set(patch).await.unwrap();
        assert!(cfg.dry_run);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let on_disk = tokio::fs::read_to_string(&path).await.unwrap();
        let reparsed: Config = serde_json::from_str(&on_disk).unwrap();
        assert!(reparsed.dry_run);
    }

    #[tokio::test]
    async fn on_change_delivers_cached_value_eagerly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::new(path);
        store.get().await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        store
            .on_change(move |_cfg| {
                seen2.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
