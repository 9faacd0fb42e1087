//! Core abstractions: [`Trackable`], [`Resource`] and [`Repository`].
//!
//! Everything the runtime knows about staleness flows through these traits.
//! A trackable exposes a canonical `path` (used as identity key by caches),
//! an existence check, a last-modified stamp and a `checksum` that changes
//! whenever the visible content changes.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use url::Url;

use crate::error::{RepositoryError, RepositoryResult};

/// Default window during which filesystem stats are served from cache.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Anything addressable and checkable for staleness.
pub trait Trackable: Send + Sync + fmt::Debug {
    /// Canonical path, unique per trackable. Used as cache identity.
    fn path(&self) -> &str;

    /// Short name (last path segment).
    fn name(&self) -> &str;

    /// Path relative to the root repository, using `/` separators.
    fn relative_path(&self) -> &str;

    /// Last modification time in milliseconds since the epoch, 0 if absent.
    fn last_modified(&self) -> i64;

    /// Content version marker. Defaults to [`Trackable::last_modified`].
    fn checksum(&self) -> i64 {
        self.last_modified()
    }

    /// Whether the trackable currently exists.
    fn exists(&self) -> bool;

    /// URL of the trackable, if it has one.
    fn url(&self) -> Option<Url> {
        None
    }

    /// The repository containing this trackable, `None` for roots and
    /// stand-alone resources.
    fn parent_repository(&self) -> Option<Arc<dyn Repository>>;
}

/// A leaf trackable with readable content.
pub trait Resource: Trackable {
    /// Raw content bytes.
    fn bytes(&self) -> RepositoryResult<Vec<u8>>;

    /// Content length in bytes, 0 when absent.
    fn length(&self) -> u64;

    /// Content decoded as UTF-8.
    fn content(&self) -> RepositoryResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| {
            RepositoryError::io(
                self.path(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// A reader over the content.
    fn reader(&self) -> RepositoryResult<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.bytes()?)))
    }

    /// Name without extension.
    fn base_name(&self) -> &str {
        strip_extension(self.name())
    }

    /// Module name: relative path without extension (`lib/util.js` -> `lib/util`).
    fn module_name(&self) -> String {
        strip_extension(self.relative_path()).to_string()
    }

    /// First line number of the source, passed to the compiler.
    fn line_number(&self) -> u32 {
        1
    }
}

/// A container of resources and child repositories.
pub trait Repository: Trackable {
    /// Look up a resource by `/`-separated path. Never fails: absent
    /// resources are returned as placeholders with `exists() == false`.
    /// Repeated lookups of the same path return the same handle.
    fn get_resource(&self, path: &str) -> Arc<dyn Resource>;

    /// Look up a child repository by `/`-separated path, with the same
    /// placeholder and idempotence rules as [`Repository::get_resource`].
    fn get_child_repository(&self, path: &str) -> Arc<dyn Repository>;

    /// Existing resources in this repository, optionally recursing.
    fn resources(&self, recursive: bool) -> RepositoryResult<Vec<Arc<dyn Resource>>>;

    /// Existing direct child repositories.
    fn repositories(&self) -> RepositoryResult<Vec<Arc<dyn Repository>>>;

    /// Refresh the view of children if the container itself changed.
    fn update(&self);

    /// Whether this repository is a root (has no parent).
    fn is_root(&self) -> bool {
        self.parent_repository().is_none()
    }
}

/// Walk up the parent chain of `repository` to its root.
pub fn root_repository(repository: Arc<dyn Repository>) -> Arc<dyn Repository> {
    let mut current = repository;
    while let Some(parent) = current.parent_repository() {
        current = parent;
    }
    current
}

/// Split a relative path into normalized segments.
///
/// Empty and `.` segments are dropped, `..` removes the previous segment
/// and is ignored at the root.
pub fn split_path(path: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    for segment in path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments
}

/// Strip the extension from the last segment of `name`.
pub fn strip_extension(name: &str) -> &str {
    let last_segment = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[last_segment..].rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..last_segment + dot],
    }
}

/// Join a relative prefix (`""` or `"lib/"`) with a child name.
pub(crate) fn join_relative(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name)
}

/// Handles created before the first sweep of dead entries.
const MIN_SWEEP: usize = 32;

/// Child handles of a repository, held weakly and keyed by name.
///
/// Repositories hold their children weakly and children hold their parent
/// strongly, so a handle stays identical for as long as anyone uses it.
/// Entries of dropped handles are swept once as many handles were created
/// as there were live entries after the previous sweep.
#[derive(Debug)]
pub(crate) struct Handles<T> {
    map: DashMap<String, Weak<T>>,
    created: AtomicUsize,
    live: AtomicUsize,
}

impl<T> Handles<T> {
    pub(crate) fn new() -> Self {
        Self {
            map: DashMap::new(),
            created: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    /// Return the live handle for `key`, creating it if none is alive.
    pub(crate) fn intern(&self, key: &str, create: impl FnOnce() -> Arc<T>) -> Arc<T> {
        let created = {
            let mut entry = self.map.entry(key.to_string()).or_default();
            if let Some(existing) = entry.upgrade() {
                return existing;
            }
            let created = create();
            *entry = Arc::downgrade(&created);
            created
        };
        let count = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.live.load(Ordering::Relaxed).max(MIN_SWEEP) {
            self.purge();
        }
        created
    }

    /// Drop entries whose handle is no longer alive.
    pub(crate) fn purge(&self) {
        self.created.store(0, Ordering::Relaxed);
        self.map.retain(|_, handle| handle.strong_count() > 0);
        self.live.store(self.map.len(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

/// Convert a `SystemTime` to milliseconds since the epoch.
pub(crate) fn system_time_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Snapshot of filesystem metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub exists: bool,
    pub is_dir: bool,
    pub last_modified: i64,
    pub length: u64,
}

impl Stat {
    /// Stat a filesystem path. Missing paths yield `Stat::default()`.
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(meta) => Self {
                exists: true,
                is_dir: meta.is_dir(),
                last_modified: meta.modified().map(system_time_millis).unwrap_or(0),
                length: meta.len(),
            },
            Err(_) => Self::default(),
        }
    }
}

/// Serves a [`Stat`] from cache for a bounded window to avoid repeated
/// filesystem stats under load.
#[derive(Debug)]
pub struct StatCache {
    interval: Duration,
    cached: Mutex<Option<(Instant, Stat)>>,
}

impl StatCache {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached stat, or run `probe` if the window expired.
    pub fn get(&self, probe: impl FnOnce() -> Stat) -> Stat {
        let mut cached = self.cached.lock();
        if let Some((at, stat)) = *cached
            && at.elapsed() < self.interval
        {
            return stat;
        }
        let stat = probe();
        *cached = Some((Instant::now(), stat));
        stat
    }

    /// Drop the cached stat so the next call probes again.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
