//! File change notification feeding schema hot reload.

use crate::observability::events;
use crate::schema::Result;
use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const COMPONENT: &str = "schema_watcher";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileEvent {
    Changed,
    Renamed,
    Removed,
    Other,
}

impl FileEvent {
    fn from_kind(kind: &EventKind) -> Self {
        match kind {
            EventKind::Modify(ModifyKind::Name(_)) => FileEvent::Renamed,
            EventKind::Modify(_) | EventKind::Create(_) => FileEvent::Changed,
            EventKind::Remove(_) => FileEvent::Removed,
            _ => FileEvent::Other,
        }
    }

    /// A burst containing any content change counts as a content change.
    fn merge(self, next: FileEvent) -> FileEvent {
        if self == FileEvent::Changed {
            self
        } else {
            next
        }
    }
}

pub type ChangeCallback = Arc<dyn Fn(FileEvent) + Send + Sync>;

/// Keeps one watch alive; closing it stops further callbacks.
pub trait WatchGuard: Send {
    fn close(&mut self);
}

/// Source of change notifications for individual files.
pub trait ChangeSource: Send + Sync {
    fn watch(&self, path: &Path, on_change: ChangeCallback) -> Result<Box<dyn WatchGuard>>;
}

/// [`ChangeSource`] backed by the platform watcher, coalescing bursts within a debounce window.
#[derive(Clone, Debug)]
pub struct NotifyChangeSource {
    debounce: Duration,
}

impl NotifyChangeSource {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for NotifyChangeSource {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

struct NotifyWatchGuard {
    watcher: Option<RecommendedWatcher>,
    closed: Arc<AtomicBool>,
    path: PathBuf,
}

impl WatchGuard for NotifyWatchGuard {
    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if self.watcher.take().is_some() {
            debug!(
                event = events::SCHEMA_WATCHER_CLOSED,
                component = COMPONENT,
                path = %self.path.display(),
                "closed schema watcher"
            );
        }
    }
}

impl Drop for NotifyWatchGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChangeSource for NotifyChangeSource {
    fn watch(&self, path: &Path, on_change: ChangeCallback) -> Result<Box<dyn WatchGuard>> {
        let (tx, rx) = mpsc::channel::<FileEvent>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let _ = tx.send(FileEvent::from_kind(&event.kind));
                }
                Err(err) => warn!(
                    event = events::SCHEMA_WATCHER_FAILED,
                    component = COMPONENT,
                    err = %err,
                    "watch error"
                ),
            }
        })?;
        watcher.watch(path, RecursiveMode::NonRecursive)?;

        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let debounce = self.debounce;

        // Exits once the watcher, and with it the sender, is dropped.
        thread::spawn(move || {
            while let Ok(first) = rx.recv() {
                let mut pending = first;
                let disconnected = loop {
                    match rx.recv_timeout(debounce) {
                        Ok(next) => pending = pending.merge(next),
                        Err(RecvTimeoutError::Timeout) => break false,
                        Err(RecvTimeoutError::Disconnected) => break true,
                    }
                };
                if closed_flag.load(Ordering::SeqCst) || disconnected {
                    return;
                }
                on_change(pending);
            }
        });

        Ok(Box::new(NotifyWatchGuard {
            watcher: Some(watcher),
            closed,
            path: path.to_path_buf(),
        }))
    }
}

/// [`ChangeSource`] driven by explicit calls, for embedders with their own notifier.
#[derive(Clone, Default)]
pub struct ManualChangeSource {
    watches: Arc<Mutex<HashMap<PathBuf, Vec<(u64, ChangeCallback)>>>>,
    next_id: Arc<Mutex<u64>>,
}

struct ManualWatchGuard {
    id: u64,
    path: PathBuf,
    watches: Arc<Mutex<HashMap<PathBuf, Vec<(u64, ChangeCallback)>>>>,
}

impl WatchGuard for ManualWatchGuard {
    fn close(&mut self) {
        let mut watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(callbacks) = watches.get_mut(&self.path) {
            callbacks.retain(|(id, _)| *id != self.id);
            if callbacks.is_empty() {
                watches.remove(&self.path);
            }
        }
    }
}

impl Drop for ManualWatchGuard {
    fn drop(&mut self) {
        self.close();
    }
}

impl ManualChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every open watch on `path`; returns how many were notified.
    pub fn fire(&self, path: &Path, event: FileEvent) -> usize {
        let callbacks: Vec<ChangeCallback> = {
            let watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
            watches
                .get(path)
                .map(|callbacks| callbacks.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in &callbacks {
            callback(event);
        }
        callbacks.len()
    }

    pub fn active_watches(&self) -> usize {
        let watches = self.watches.lock().unwrap_or_else(|e| e.into_inner());
        watches.values().map(Vec::len).sum()
    }
}

impl ChangeSource for ManualChangeSource {
    fn watch(&self, path: &Path, on_change: ChangeCallback) -> Result<Box<dyn WatchGuard>> {
        let id = {
            let mut next_id = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next_id += 1;
            *next_id
        };
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(path.to_path_buf())
            .or_default()
            .push((id, on_change));

        Ok(Box::new(ManualWatchGuard {
            id,
            path: path.to_path_buf(),
            watches: self.watches.clone(),
        }))
    }
}
