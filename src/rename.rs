//! Output-name generation per profile, with an in-flight target reservation
//! registry so two concurrent pipelines never pick the same destination.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::config::Profile;
use crate::template::{self, TemplateContext};

/// The winning reservation for a single `targetForProfile` call. Callers
/// MUST call `RenameService::release` once the operation finishes, whether
/// it succeeded or not.
pub struct ReservedTarget {
    pub dir: PathBuf,
    pub filename: String,
}

impl ReservedTarget {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.filename)
    }
}

/// Process-local set of absolute target paths reserved by a concurrent
/// operation, plus the matching output-name logic.
#[derive(Default)]
pub struct RenameService {
    in_flight: Mutex<HashSet<PathBuf>>,
}

impl RenameService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expand `profile.template` against `src_path`/`birthtime`, then walk
    /// `name`, `name_2`, `name_3`, … until a path that is neither reserved
    /// nor already on disk is found, reserving it atomically.
    pub async fn target_for_profile(
        &self,
        src_path: &Path,
        birthtime: SystemTime,
        profile: &Profile,
    ) -> ReservedTarget {
        let dir = src_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let ctx = TemplateContext::new(src_path, birthtime, profile.prefix.clone());
        let base = template::expand(&profile.template, &ctx);

        let mut guard = self.in_flight.lock().await;
        let mut counter = 1u32;
        loop {
            let candidate = if counter == 1 {
                base.clone()
            } else {
                numbered_variant(&base, counter)
            };
            let candidate_path = dir.join(&candidate);
            let on_disk = tokio::fs::try_exists(&candidate_path).await.unwrap_or(false);
            if !guard.contains(&candidate_path) && !on_disk {
                guard.insert(candidate_path.clone());
                return ReservedTarget {
                    dir,
                    filename: candidate,
                };
            }
            counter += 1;
        }
    }

    /// Release a previously reserved target. Safe to call even if the path
    /// was never reserved.
    pub async fn release(&self, dir: &Path, filename: &str) {
        self.in_flight.lock().await.remove(&dir.join(filename));
    }

    /// True when `basename` already looks like it was produced by this
    /// profile's legacy naming scheme, so reprocessing it would be a no-op.
    pub fn needs_rename_for_profile(&self, basename: &str, profile: &Profile) -> bool {
        !template::matches_legacy_shape(basename, &profile.prefix)
    }
}

fn numbered_variant(base: &str, n: u32) -> String {
    let path = Path::new(base);
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| base.to_string());
    format!("{stem}_{n}{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Action;
    use std::time::UNIX_EPOCH;

    fn profile() -> Profile {
        Profile {
            id: "screenshots".to_string(),
            name: "Screenshots".to_string(),
            enabled: true,
            pattern: "Screenshot*".to_string(),
            is_regex: false,
            template: "<prefix>_<datetime>".to_string(),
            prefix: "Screenshot".to_string(),
            priority: 1,
            action: Action::Rename,
        }
    }

    #[tokio::test]
    async fn concurrent_reservations_on_same_inputs_are_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let service = RenameService::new();
        let src = dir.path().join("Screenshot 2025-10-30.png");
        let birthtime = UNIX_EPOCH + std::time::Duration::from_secs(1_761_814_800);

        let first = service.target_for_profile(&src, birthtime, &profile()).await;
        let second = service.target_for_profile(&src, birthtime, &profile()).await;
        assert_ne!(first.path(), second.path());

        service.release(&first.dir, &first.filename).await;
        service.release(&second.dir, &second.filename).await;
    }

    #[tokio::test]
    async fn release_frees_the_slot_for_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let service = RenameService::new();
        let src = dir.path().join("Screenshot 2025-10-30.png");
        let birthtime = UNIX_EPOCH + std::time::Duration::from_secs(1_761_814_800);

        let first = service.target_for_profile(&src, birthtime, &profile()).await;
        service.release(&first.dir, &first.filename).await;
        let second = service.target_for_profile(&src, birthtime, &profile()).await;
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn needs_rename_false_for_legacy_shaped_basename() {
        let service = RenameService::new();
        let profile = profile();
        assert!(!service.needs_rename_for_profile(
            "Screenshot_2025-10-30_09-00-00.png",
            &profile
        ));
        assert!(service.needs_rename_for_profile("Screenshot 2025-10-30 at 09.00.00.png", &profile));
    }
}
