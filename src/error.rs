//! Typed error hierarchy for the namefix core.
//!
//! One sub-enum per subsystem, aggregated into [`NamefixError`]. No
//! string-based error propagation: every variant preserves its source error
//! so callers (and `tracing` spans) can log the full causal chain.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, NamefixError>;

#[derive(Debug)]
pub enum NamefixError {
    Config(ConfigError),
    Journal(JournalError),
    Watch(WatchError),
    Convert(ConvertError),
    Trash(TrashError),
    Rename(RenameError),
    /// Programmer error: an operation was attempted before `init()`.
    NotInitialized,
}

impl fmt::Display for NamefixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Journal(e) => write!(f, "journal error: {e}"),
            Self::Watch(e) => write!(f, "watcher error: {e}"),
            Self::Convert(e) => write!(f, "conversion error: {e}"),
            Self::Trash(e) => write!(f, "trash error: {e}"),
            Self::Rename(e) => write!(f, "rename error: {e}"),
            Self::NotInitialized => write!(f, "NamefixService used before init()"),
        }
    }
}

impl std::error::Error for NamefixError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Journal(e) => Some(e),
            Self::Watch(e) => Some(e),
            Self::Convert(e) => Some(e),
            Self::Trash(e) => Some(e),
            Self::Rename(e) => Some(e),
            Self::NotInitialized => None,
        }
    }
}

macro_rules! impl_from {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for NamefixError {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        }
    };
}

impl_from!(Config, ConfigError);
impl_from!(Journal, JournalError);
impl_from!(Watch, WatchError);
impl_from!(Convert, ConvertError);
impl_from!(Trash, TrashError);
impl_from!(Rename, RenameError);

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    Serialize(serde_json::Error),
    /// Structural validation failed; caller should fall back to defaults
    /// without touching the on-disk file.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "I/O error on '{}': {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse '{}': {source}", path.display())
            }
            Self::Serialize(source) => write!(f, "failed to serialize config: {source}"),
            Self::Invalid(reason) => write!(f, "invalid configuration: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Serialize(source) => Some(source),
            Self::Invalid(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Journal errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum JournalError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, line: usize, source: serde_json::Error },
}

impl fmt::Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "I/O error on journal '{}': {source}", path.display())
            }
            Self::Parse { path, line, source } => write!(
                f,
                "failed to parse journal '{}' at line {line}: {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for JournalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum WatchError {
    Init { path: PathBuf, reason: String },
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for WatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init { path, reason } => {
                write!(f, "failed to watch '{}': {reason}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "I/O error watching '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for WatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Init { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConvertError {
    Unsupported { ext: String },
    ToolFailed { src: PathBuf, stderr: String },
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported { ext } => write!(f, "unsupported format '{ext}'"),
            Self::ToolFailed { src, stderr } => write!(
                f,
                "conversion of '{}' failed: {stderr}",
                src.display()
            ),
            Self::Io { path, source } => {
                write!(f, "I/O error converting '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trash errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum TrashError {
    NotFound { path: PathBuf },
    Failed { path: PathBuf, reason: String },
}

impl fmt::Display for TrashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => {
                write!(f, "'{}' does not exist", path.display())
            }
            Self::Failed { path, reason } => {
                write!(f, "could not trash '{}': {reason}", path.display())
            }
        }
    }
}

impl std::error::Error for TrashError {}

// ---------------------------------------------------------------------------
// Rename errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum RenameError {
    SourceMissing { path: PathBuf },
    Io { from: PathBuf, to: PathBuf, source: io::Error },
}

impl fmt::Display for RenameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceMissing { path } => {
                write!(f, "source '{}' disappeared before rename", path.display())
            }
            Self::Io { from, to, source } => write!(
                f,
                "failed to rename '{}' to '{}': {source}",
                from.display(),
                to.display()
            ),
        }
    }
}

impl std::error::Error for RenameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::SourceMissing { .. } => None,
        }
    }
}
