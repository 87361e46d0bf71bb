//! Redirect map and data-mover drain contract.
//!
//! The actual filesystem-scanning data mover that decides which files to
//! stage into a faster tier is an out-of-scope collaborator. This module
//! ships the concurrency contract it publishes into: a queue the mover
//! drains, and a `MoverHook` callback it invokes per path once a file has
//! been staged, which updates the shared redirect map the server's open
//! handler consults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Server-held map from a requested (canonical) path to the path it should
/// actually be opened from, once the mover has staged a local copy.
#[derive(Default)]
pub struct RedirectMap {
    inner: Mutex<HashMap<String, PathBuf>>,
}

impl RedirectMap {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The path the open handler should actually use for `requested`.
    pub fn resolve(&self, requested: &str) -> PathBuf {
        self.inner
            .lock()
            .unwrap()
            .get(requested)
            .cloned()
            .unwrap_or_else(|| PathBuf::from(requested))
    }

    pub fn publish(&self, requested: &str, staged: PathBuf) {
        self.inner.lock().unwrap().insert(requested.to_string(), staged);
    }

    /// Whether a staged path has already been published for `requested`.
    pub fn contains(&self, requested: &str) -> bool {
        self.inner.lock().unwrap().contains_key(requested)
    }
}

/// Callback the mover's drain loop invokes once a path has been staged.
pub type MoverHook = Arc<dyn Fn(&str, PathBuf) + Send + Sync>;

/// Builds a hook that republishes into `map`. Handed to whatever drain loop
/// or external mover process consumes `enqueue`'s output.
pub fn redirect_hook(map: Arc<RedirectMap>) -> MoverHook {
    Arc::new(move |requested, staged| map.publish(requested, staged))
}

/// The enqueue side of the mover contract: paths observed during opens that
/// might benefit from staging are pushed here. `Sender` isn't `Sync`, so the
/// handle is shared across the server's per-connection threads behind a
/// mutex rather than by cloning a sender per thread.
pub struct MoverQueue {
    tx: Mutex<Sender<String>>,
}

impl MoverQueue {
    /// Spawns the drain thread. `stage` decides whether (and where) to
    /// stage a path; `hook` is notified for every `Some` result. Returns the
    /// queue handle and the thread's join handle.
    pub fn spawn<F>(hook: MoverHook, stage: F) -> (Self, JoinHandle<()>)
    where
        F: Fn(&str) -> Option<PathBuf> + Send + 'static,
    {
        let (tx, rx): (Sender<String>, Receiver<String>) = mpsc::channel();
        let handle = thread::spawn(move || {
            for requested in rx {
                if let Some(staged) = stage(&requested) {
                    hook(&requested, staged);
                }
            }
        });
        (Self { tx: Mutex::new(tx) }, handle)
    }

    /// A queue with no backing drain thread; `enqueue` silently no-ops since
    /// nothing ever receives. Used where no mover is wired up yet.
    pub fn inert() -> Self {
        let (tx, _rx) = mpsc::channel();
        Self { tx: Mutex::new(tx) }
    }

    pub fn enqueue(&self, path: impl AsRef<Path>) {
        let _ = self
            .tx
            .lock()
            .unwrap()
            .send(path.as_ref().to_string_lossy().into_owned());
    }
}
