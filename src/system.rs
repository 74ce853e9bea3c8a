//! System interface.
//!
//! The bundler performs all of its I/O through [`System`] so the same core
//! can run against the real filesystem or against an in-memory tree in an
//! embedded host. [`HostSystem`] backs the capability set with `std::fs`,
//! `notify` watches and base64 decoding; [`MemorySystem`] keeps everything
//! in memory and lets callers inject filesystem events.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, SystemTime};

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use notify::Watcher;

use crate::error::CompilerError;
use crate::paths;

/// A change reported by the file-watch layer.
///
/// Delivery is at-least-once; duplicates are absorbed by the watch
/// controller's dirty flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// The file at the given path was created or modified.
    Changed(PathBuf),
    /// The file at the given path was removed.
    Removed(PathBuf),
}

impl FsEvent {
    /// The affected path.
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Changed(path) | FsEvent::Removed(path) => path,
        }
    }
}

/// Capability set the bundler requires from its host.
pub trait System {
    /// Read a UTF-8 text file.
    fn read_text(&self, path: &Path) -> Result<String, CompilerError>;

    /// Write a UTF-8 text file, creating parent directories as needed.
    fn write_text(&self, path: &Path, text: &str) -> Result<(), CompilerError>;

    /// Whether a regular file exists at `path`.
    fn is_file(&self, path: &Path) -> bool;

    /// Whether a directory exists at `path`.
    fn is_dir(&self, path: &Path) -> bool;

    /// List the entries of a directory.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, CompilerError>;

    /// Resolve symlinks, yielding the canonical path.
    fn real_path(&self, path: &Path) -> Option<PathBuf>;

    /// Last modification time of a file.
    fn mtime(&self, path: &Path) -> Option<SystemTime>;

    /// Decode base64 data, as found in inline source-map URLs.
    fn decode_base64(&self, text: &str) -> Result<Vec<u8>, CompilerError>;

    /// Current working directory.
    fn cwd(&self) -> PathBuf;

    /// Read an environment variable.
    fn env(&self, name: &str) -> Option<String>;

    /// Subscribe a non-recursive watch on a file or directory.
    fn watch(&self, path: &Path) -> Result<(), CompilerError>;

    /// Drop a watch previously subscribed with [`System::watch`].
    fn unwatch(&self, path: &Path) -> Result<(), CompilerError>;

    /// Wait up to `timeout` for the next filesystem event.
    fn next_event(&self, timeout: Duration) -> Option<FsEvent>;
}

/// [`System`] implementation backed by the host filesystem.
pub struct HostSystem {
    watcher: RefCell<notify::RecommendedWatcher>,
    events: Receiver<notify::Result<notify::Event>>,
    pending: RefCell<VecDeque<FsEvent>>,
}

impl HostSystem {
    /// Create a host system, including its watch subsystem.
    pub fn new() -> Result<Self, CompilerError> {
        let (tx, rx) = std::sync::mpsc::channel();
        let watcher = notify::recommended_watcher(tx)
            .map_err(|e| CompilerError::Watch(e.to_string()))?;
        Ok(HostSystem {
            watcher: RefCell::new(watcher),
            events: rx,
            pending: RefCell::new(VecDeque::new()),
        })
    }

    fn enqueue(&self, event: notify::Event) {
        let mut pending = self.pending.borrow_mut();
        for path in event.paths {
            let mapped = match event.kind {
                notify::EventKind::Remove(_) => FsEvent::Removed(path),
                _ => FsEvent::Changed(path),
            };
            pending.push_back(mapped);
        }
    }
}

impl System for HostSystem {
    fn read_text(&self, path: &Path) -> Result<String, CompilerError> {
        std::fs::read_to_string(path)
            .map_err(|e| CompilerError::io(&paths::to_posix(path), e))
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<(), CompilerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CompilerError::io(&paths::to_posix(parent), e))?;
        }
        std::fs::write(path, text)
            .map_err(|e| CompilerError::io(&paths::to_posix(path), e))
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, CompilerError> {
        let entries = std::fs::read_dir(path)
            .map_err(|e| CompilerError::io(&paths::to_posix(path), e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry =
                entry.map_err(|e| CompilerError::io(&paths::to_posix(path), e))?;
            out.push(entry.path());
        }
        out.sort();
        Ok(out)
    }

    fn real_path(&self, path: &Path) -> Option<PathBuf> {
        std::fs::canonicalize(path).ok()
    }

    fn mtime(&self, path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn decode_base64(&self, text: &str) -> Result<Vec<u8>, CompilerError> {
        BASE64_STANDARD
            .decode(text)
            .map_err(|e| CompilerError::Base64(e.to_string()))
    }

    fn cwd(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    }

    fn env(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn watch(&self, path: &Path) -> Result<(), CompilerError> {
        self.watcher
            .borrow_mut()
            .watch(path, notify::RecursiveMode::NonRecursive)
            .map_err(|e| CompilerError::Watch(e.to_string()))
    }

    fn unwatch(&self, path: &Path) -> Result<(), CompilerError> {
        self.watcher
            .borrow_mut()
            .unwatch(path)
            .map_err(|e| CompilerError::Watch(e.to_string()))
    }

    fn next_event(&self, timeout: Duration) -> Option<FsEvent> {
        if let Some(event) = self.pending.borrow_mut().pop_front() {
            return Some(event);
        }
        loop {
            match self.events.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    self.enqueue(event);
                    if let Some(event) = self.pending.borrow_mut().pop_front() {
                        return Some(event);
                    }
                }
                Ok(Err(error)) => {
                    log::warn!("watch error: {}", error);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                }
            }
        }
    }
}

/// In-memory [`System`] used by the embedded host and the test suite.
///
/// Paths are stored in POSIX form; watches are recorded so tests can assert
/// on subscriptions, and filesystem events are injected with
/// [`MemorySystem::push_event`].
#[derive(Default)]
pub struct MemorySystem {
    files: RefCell<BTreeMap<String, (String, u64)>>,
    dirs: RefCell<BTreeSet<String>>,
    watched: RefCell<BTreeSet<String>>,
    events: RefCell<VecDeque<FsEvent>>,
    env: RefCell<BTreeMap<String, String>>,
    cwd: RefCell<String>,
    clock: RefCell<u64>,
}

impl MemorySystem {
    /// Create an empty in-memory system rooted at `/`.
    pub fn new() -> Self {
        let sys = MemorySystem::default();
        *sys.cwd.borrow_mut() = "/".to_string();
        sys
    }

    /// Insert a file, creating all parent directories.
    pub fn add_file(&self, path: &str, text: &str) {
        let path = paths::normalize(path);
        let stamp = self.tick();
        self.files
            .borrow_mut()
            .insert(path.clone(), (text.to_string(), stamp));
        let mut dir = paths::dirname(&path).to_string();
        let mut dirs = self.dirs.borrow_mut();
        while !dir.is_empty() && dir != "/" {
            dirs.insert(dir.clone());
            dir = paths::dirname(&dir).to_string();
        }
    }

    /// Insert an empty directory.
    pub fn add_dir(&self, path: &str) {
        self.dirs.borrow_mut().insert(paths::normalize(path));
    }

    /// Set an environment variable visible through [`System::env`].
    pub fn set_env(&self, name: &str, value: &str) {
        self.env
            .borrow_mut()
            .insert(name.to_string(), value.to_string());
    }

    /// Set the working directory reported by [`System::cwd`].
    pub fn set_cwd(&self, path: &str) {
        *self.cwd.borrow_mut() = path.to_string();
    }

    /// Queue a filesystem event for delivery via [`System::next_event`].
    pub fn push_event(&self, event: FsEvent) {
        self.events.borrow_mut().push_back(event);
    }

    /// Paths currently subscribed through [`System::watch`].
    pub fn watched(&self) -> Vec<String> {
        self.watched.borrow().iter().cloned().collect()
    }

    /// Read a file previously written through the interface.
    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .borrow()
            .get(&paths::normalize(path))
            .map(|(text, _)| text.clone())
    }

    fn tick(&self) -> u64 {
        let mut clock = self.clock.borrow_mut();
        *clock += 1;
        *clock
    }
}

impl System for MemorySystem {
    fn read_text(&self, path: &Path) -> Result<String, CompilerError> {
        let key = paths::to_posix(path);
        self.files
            .borrow()
            .get(&key)
            .map(|(text, _)| text.clone())
            .ok_or_else(|| {
                CompilerError::io(
                    &key,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                )
            })
    }

    fn write_text(&self, path: &Path, text: &str) -> Result<(), CompilerError> {
        self.add_file(&paths::to_posix(path), text);
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.files.borrow().contains_key(&paths::to_posix(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs.borrow().contains(&paths::to_posix(path))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>, CompilerError> {
        let key = paths::to_posix(path);
        let prefix = format!("{}/", key.trim_end_matches('/'));
        let mut out = BTreeSet::new();
        for candidate in self
            .files
            .borrow()
            .keys()
            .chain(self.dirs.borrow().iter())
        {
            if let Some(rest) = candidate.strip_prefix(&prefix) {
                if let Some(first) = rest.split('/').next() {
                    if !first.is_empty() {
                        out.insert(format!("{}{}", prefix, first));
                    }
                }
            }
        }
        Ok(out.into_iter().map(|p| paths::from_posix(&p)).collect())
    }

    fn real_path(&self, path: &Path) -> Option<PathBuf> {
        if self.is_file(path) || self.is_dir(path) {
            Some(path.to_path_buf())
        } else {
            None
        }
    }

    fn mtime(&self, path: &Path) -> Option<SystemTime> {
        self.files
            .borrow()
            .get(&paths::to_posix(path))
            .map(|(_, stamp)| SystemTime::UNIX_EPOCH + Duration::from_secs(*stamp))
    }

    fn decode_base64(&self, text: &str) -> Result<Vec<u8>, CompilerError> {
        BASE64_STANDARD
            .decode(text)
            .map_err(|e| CompilerError::Base64(e.to_string()))
    }

    fn cwd(&self) -> PathBuf {
        paths::from_posix(&self.cwd.borrow())
    }

    fn env(&self, name: &str) -> Option<String> {
        self.env.borrow().get(name).cloned()
    }

    fn watch(&self, path: &Path) -> Result<(), CompilerError> {
        self.watched.borrow_mut().insert(paths::to_posix(path));
        Ok(())
    }

    fn unwatch(&self, path: &Path) -> Result<(), CompilerError> {
        self.watched.borrow_mut().remove(&paths::to_posix(path));
        Ok(())
    }

    fn next_event(&self, _timeout: Duration) -> Option<FsEvent> {
        self.events.borrow_mut().pop_front()
    }
}
