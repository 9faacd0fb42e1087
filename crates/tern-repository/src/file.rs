//! Filesystem-backed repositories and resources.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace};
use url::Url;

use crate::error::{RepositoryError, RepositoryResult};
use crate::trackable::{
    DEFAULT_CHECK_INTERVAL, Handles, Repository, Resource, Stat, StatCache, Trackable,
    join_relative, split_path,
};

/// Cached directory listing, refreshed when the directory mtime changes.
#[derive(Debug, Default)]
struct Listing {
    marker: Option<i64>,
    files: Vec<String>,
    dirs: Vec<String>,
}

/// A directory on the local filesystem.
#[derive(Debug)]
pub struct FileRepository {
    self_ref: Weak<FileRepository>,
    parent: Option<Arc<FileRepository>>,
    dir: PathBuf,
    path: String,
    name: String,
    relative: String,
    stat: StatCache,
    listing: RwLock<Listing>,
    resources: Handles<FileResource>,
    repositories: Handles<FileRepository>,
}

impl FileRepository {
    /// Open a root repository with the default stat cache window.
    pub fn new(dir: impl AsRef<Path>) -> Arc<Self> {
        Self::with_check_interval(dir, DEFAULT_CHECK_INTERVAL)
    }

    /// Open a root repository, caching stats for `interval`.
    /// `Duration::ZERO` disables stat caching.
    pub fn with_check_interval(dir: impl AsRef<Path>, interval: Duration) -> Arc<Self> {
        let dir = dir.as_ref();
        let dir = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
        Self::build(dir, None, String::new(), interval)
    }

    fn build(
        dir: PathBuf,
        parent: Option<Arc<FileRepository>>,
        relative: String,
        interval: Duration,
    ) -> Arc<Self> {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let path = format!("{}/", dir.display().to_string().trim_end_matches('/'));
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            parent,
            dir,
            path,
            name,
            relative,
            stat: StatCache::new(interval),
            listing: RwLock::new(Listing::default()),
            resources: Handles::new(),
            repositories: Handles::new(),
        })
    }

    /// The directory this repository reads from.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn current_stat(&self) -> Stat {
        self.stat.get(|| Stat::of(&self.dir))
    }

    fn child_repository(&self, name: &str) -> Arc<FileRepository> {
        self.repositories.intern(name, || {
            Self::build(
                self.dir.join(name),
                self.self_ref.upgrade(),
                join_relative(&self.relative, &format!("{}/", name)),
                self.stat.interval(),
            )
        })
    }

    fn resource(&self, name: &str) -> Arc<FileResource> {
        self.resources.intern(name, || {
            let file = self.dir.join(name);
            Arc::new(FileResource {
                path: file.display().to_string(),
                name: name.to_string(),
                relative: join_relative(&self.relative, name),
                parent: self.self_ref.upgrade(),
                stat: StatCache::new(self.stat.interval()),
                file,
            })
        })
    }

    fn descend(&self, dirs: &[&str]) -> Option<Arc<FileRepository>> {
        let (first, rest) = dirs.split_first()?;
        let mut repo = self.child_repository(first);
        for name in rest {
            repo = repo.child_repository(name);
        }
        Some(repo)
    }
}

impl Trackable for FileRepository {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> &str {
        &self.relative
    }

    fn last_modified(&self) -> i64 {
        self.current_stat().last_modified
    }

    fn exists(&self) -> bool {
        let stat = self.current_stat();
        stat.exists && stat.is_dir
    }

    fn url(&self) -> Option<Url> {
        Url::from_directory_path(&self.dir).ok()
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .clone()
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Repository for FileRepository {
    fn get_resource(&self, path: &str) -> Arc<dyn Resource> {
        let segments = split_path(path);
        let Some((name, dirs)) = segments.split_last() else {
            return self.resource("");
        };
        match self.descend(dirs) {
            Some(repo) => repo.resource(name),
            None => self.resource(name),
        }
    }

    fn get_child_repository(&self, path: &str) -> Arc<dyn Repository> {
        let segments = split_path(path);
        if let Some(repo) = self.descend(&segments) {
            return repo;
        }
        match self.self_ref.upgrade() {
            Some(this) => this,
            None => Self::build(
                self.dir.clone(),
                self.parent.clone(),
                self.relative.clone(),
                self.stat.interval(),
            ),
        }
    }

    fn resources(&self, recursive: bool) -> RepositoryResult<Vec<Arc<dyn Resource>>> {
        self.update();
        let (files, dirs) = {
            let listing = self.listing.read();
            (listing.files.clone(), listing.dirs.clone())
        };
        let mut resources: Vec<Arc<dyn Resource>> = files
            .iter()
            .map(|name| self.resource(name) as Arc<dyn Resource>)
            .collect();
        if recursive {
            for dir in dirs {
                resources.extend(self.child_repository(&dir).resources(true)?);
            }
        }
        Ok(resources)
    }

    fn repositories(&self) -> RepositoryResult<Vec<Arc<dyn Repository>>> {
        self.update();
        let dirs = self.listing.read().dirs.clone();
        Ok(dirs
            .iter()
            .map(|name| self.child_repository(name) as Arc<dyn Repository>)
            .collect())
    }

    fn update(&self) {
        let marker = self.current_stat().last_modified;
        let mut listing = self.listing.write();
        if listing.marker == Some(marker) {
            return;
        }

        trace!(path = %self.path, "rescanning directory");
        listing.files.clear();
        listing.dirs.clear();
        match std::fs::read_dir(&self.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().to_string();
                    match entry.file_type() {
                        Ok(kind) if kind.is_dir() => listing.dirs.push(name),
                        Ok(_) => listing.files.push(name),
                        Err(_) => {}
                    }
                }
            }
            Err(e) => debug!(path = %self.path, error = %e, "directory not readable"),
        }
        listing.files.sort();
        listing.dirs.sort();
        listing.marker = Some(marker);

        self.resources.purge();
        self.repositories.purge();
    }
}

/// A file on the local filesystem.
#[derive(Debug)]
pub struct FileResource {
    file: PathBuf,
    path: String,
    name: String,
    relative: String,
    parent: Option<Arc<FileRepository>>,
    stat: StatCache,
}

impl FileResource {
    /// The file this resource reads from.
    pub fn file(&self) -> &Path {
        &self.file
    }

    fn current_stat(&self) -> Stat {
        self.stat.get(|| Stat::of(&self.file))
    }
}

impl Trackable for FileResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> &str {
        &self.relative
    }

    fn last_modified(&self) -> i64 {
        self.current_stat().last_modified
    }

    fn exists(&self) -> bool {
        let stat = self.current_stat();
        stat.exists && !stat.is_dir
    }

    fn url(&self) -> Option<Url> {
        Url::from_file_path(&self.file).ok()
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .clone()
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Resource for FileResource {
    fn bytes(&self) -> RepositoryResult<Vec<u8>> {
        if !self.exists() {
            return Err(RepositoryError::not_found(&self.path));
        }
        std::fs::read(&self.file).map_err(|e| RepositoryError::io(&self.path, e))
    }

    fn length(&self) -> u64 {
        self.current_stat().length
    }
}
