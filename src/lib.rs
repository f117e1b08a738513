//! namefix-core: watches directories for newly created files and applies
//! per-file renaming/conversion actions driven by user-defined profiles.
//!
//! This crate is the processing engine only — terminal UI, the desktop
//! tray shell, CLI parsing and the request/response bridge that front it
//! are external collaborators. See [`NamefixService`] for the orchestrator
//! entry point.

pub mod config;
pub mod convert;
pub mod error;
pub mod events;
pub mod fs_safe;
pub mod journal;
pub mod logging;
pub mod matcher;
pub mod paths;
pub mod rename;
pub mod service;
pub mod template;
pub mod trash;
pub mod watch;

pub use config::{Action, Config, ConfigPatch, ConfigStore, Profile};
pub use error::{NamefixError, Result};
pub use events::{EventBus, ServiceFileEvent, StatusEvent, ToastEvent, ToastLevel};
pub use service::NamefixService;
