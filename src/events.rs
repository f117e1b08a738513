//! Typed pub/sub: one `Emitter<T>` per event kind, composed into an
//! `EventBus` with the four keys `spec.md` §4.11 names.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::Config;

type Handler<T> = Arc<dyn Fn(T) + Send + Sync>;

/// A single typed channel. Handlers are invoked synchronously, in
/// registration order; a panicking handler is caught so it can't prevent
/// delivery to the rest.
type HandlerList<T> = Arc<Mutex<Vec<(u64, Handler<T>)>>>;

pub struct Emitter<T: Clone> {
    handlers: HandlerList<T>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_shared(Arc::new(handler))
    }

    /// Like `subscribe`, but accepts an already-shared handler so the caller
    /// can keep a clone to invoke directly (used by `ConfigStore::on_change`
    /// for eager delivery of the current value).
    pub fn subscribe_shared(&self, handler: Handler<T>) -> Unsubscribe {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().unwrap().push((id, handler));
        let handlers = self.handlers.clone();
        Unsubscribe::new(id, Arc::new(move |id| {
            handlers.lock().unwrap().retain(|(hid, _)| *hid != id);
        }))
    }

    pub fn emit(&self, value: T) {
        let handlers: Vec<Handler<T>> = {
            let guard = self.handlers.lock().unwrap();
            guard.iter().map(|(_, h)| h.clone()).collect()
        };
        for handler in handlers {
            let value = value.clone();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(value)));
            if let Err(e) = result {
                tracing::error!(panic = ?e, "event handler panicked; continuing delivery");
            }
        }
    }
}

type RemoveFn = Arc<dyn Fn(u64) + Send + Sync>;

/// A subscription handle. Dropping it does NOT unsubscribe (matching the
/// explicit-unsubscribe contract in `spec.md` §4.11); call `unsubscribe()`.
pub struct Unsubscribe {
    id: u64,
    remove: RemoveFn,
}

impl Unsubscribe {
    fn new(id: u64, remove: RemoveFn) -> Self {
        Self { id, remove }
    }

    pub fn unsubscribe(self) {
        (self.remove)(self.id);
    }
}

// ---------------------------------------------------------------------------
// Service-wide event map
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServiceFileEvent {
    Preview {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        target: String,
    },
    Applied {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        target: String,
    },
    Skipped {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        message: String,
    },
    Error {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        message: String,
    },
    Converted {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        format: String,
    },
    ConvertError {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
        message: String,
    },
    Trashed {
        file: PathBuf,
        directory: PathBuf,
        timestamp: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToastEvent {
    pub message: String,
    pub level: ToastLevel,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub running: bool,
    pub directories: Vec<PathBuf>,
    pub dry_run: bool,
    pub launch_on_login: bool,
}

/// Typed pub/sub bus tying the four event kinds from `spec.md` §4.11
/// together: `file`, `status`, `config`, `toast`.
#[derive(Default)]
pub struct EventBus {
    pub file: Emitter<ServiceFileEvent>,
    pub status: Emitter<StatusEvent>,
    pub config: Emitter<Config>,
    pub toast: Emitter<ToastEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emits_to_all_subscribers_in_order() {
        let emitter: Emitter<i32> = Emitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        emitter.subscribe(move |v| o1.lock().unwrap().push(("a", v)));
        let o2 = order.clone();
        emitter.subscribe(move |v| o2.lock().unwrap().push(("b", v)));
        emitter.emit(42);
        assert_eq!(*order.lock().unwrap(), vec![("a", 42), ("b", 42)]);
    }

    #[test]
    fn panicking_handler_does_not_block_others() {
        let emitter: Emitter<i32> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        emitter.subscribe(|_| panic!("boom"));
        let c = count.clone();
        emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let emitter: Emitter<i32> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let handle = emitter.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit(1);
        handle.unsubscribe();
        emitter.emit(1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
