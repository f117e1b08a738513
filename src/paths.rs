//! Platform-aware resolution of the config/state/logs directories.
//!
//! Resolution order for each directory: an explicit env var override, then
//! `XDG_*` (honored on every platform, matching the spec's wire contract),
//! then the `directories` crate's platform default.

use std::env;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;

const QUALIFIER: &str = "";
const ORGANIZATION: &str = "";
const APPLICATION: &str = "namefix";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Normalize a path: expand `~`, then resolve to an absolute path without
/// requiring the path to exist (unlike `std::fs::canonicalize`).
pub fn normalize(path: &str) -> PathBuf {
    let expanded = expand_home(path);
    if expanded.is_absolute() {
        expanded
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    }
}

/// `NAMEFIX_HOME` env override takes precedence for every directory kind.
fn namefix_home() -> Option<PathBuf> {
    env::var_os("NAMEFIX_HOME").map(PathBuf::from)
}

/// Resolve the directory holding `config.json`.
pub fn config_dir() -> PathBuf {
    if let Some(home) = namefix_home() {
        return home;
    }
    if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("namefix");
    }
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".namefix"))
}

/// Resolve the directory holding `journal.ndjson`.
pub fn state_dir() -> PathBuf {
    if let Some(home) = namefix_home() {
        return home;
    }
    if let Some(xdg) = env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("namefix");
    }
    project_dirs()
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".namefix"))
}

/// Resolve the directory external collaborators should write logs into.
pub fn logs_dir() -> PathBuf {
    if let Some(home) = namefix_home() {
        return home.join("logs");
    }
    if let Some(xdg) = env::var_os("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("namefix").join("logs");
    }
    project_dirs()
        .map(|p| p.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from(".namefix/logs"))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}

pub fn journal_file() -> PathBuf {
    state_dir().join("journal.ndjson")
}

/// True if `path` is an absolute, non-empty path.
pub fn is_valid_watch_dir(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_absolute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_tilde() {
        env::set_var("HOME", "/home/tester");
        assert_eq!(expand_home("~/Pictures"), PathBuf::from("/home/tester/Pictures"));
        assert_eq!(expand_home("~"), PathBuf::from("/home/tester"));
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[test]
    fn namefix_home_overrides_all_dirs() {
        env::set_var("NAMEFIX_HOME", "/tmp/namefix-test-home");
        assert_eq!(config_dir(), PathBuf::from("/tmp/namefix-test-home"));
        assert_eq!(state_dir(), PathBuf::from("/tmp/namefix-test-home"));
        env::remove_var("NAMEFIX_HOME");
    }

    #[test]
    fn valid_watch_dir_requires_absolute_nonempty() {
        assert!(is_valid_watch_dir(Path::new("/abs/dir")));
        assert!(!is_valid_watch_dir(Path::new("relative")));
        assert!(!is_valid_watch_dir(Path::new("")));
    }
}
