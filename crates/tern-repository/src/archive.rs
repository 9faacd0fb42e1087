//! Zip archive repositories.
//!
//! The archive is indexed once per modification of the archive file. Entry
//! checksums come from the entry CRC and size, so rewriting an archive
//! without touching an entry does not invalidate that entry.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{trace, warn};
use url::Url;

use crate::error::{RepositoryError, RepositoryResult};
use crate::trackable::{
    DEFAULT_CHECK_INTERVAL, Handles, Repository, Resource, Stat, StatCache, Trackable,
    join_relative, split_path,
};

#[derive(Debug, Clone, Copy)]
struct EntryInfo {
    crc32: u32,
    size: u64,
}

impl EntryInfo {
    fn checksum(&self) -> i64 {
        ((self.size as i64) << 32) ^ self.crc32 as i64
    }
}

#[derive(Debug, Default)]
struct Entries {
    marker: Option<i64>,
    files: HashMap<String, EntryInfo>,
    dirs: HashSet<String>,
}

/// Shared index over one archive file.
#[derive(Debug)]
struct ArchiveIndex {
    file: PathBuf,
    path: String,
    stat: StatCache,
    entries: RwLock<Entries>,
}

impl ArchiveIndex {
    /// Re-scan the archive if its modification time changed.
    fn refresh(&self) -> Stat {
        let stat = self.stat.get(|| Stat::of(&self.file));
        if self.entries.read().marker == Some(stat.last_modified) {
            return stat;
        }

        let mut entries = self.entries.write();
        if entries.marker == Some(stat.last_modified) {
            return stat;
        }
        trace!(path = %self.path, "indexing archive");
        match scan_archive(&self.file, &self.path) {
            Ok((files, dirs)) => {
                entries.files = files;
                entries.dirs = dirs;
            }
            Err(e) => {
                if stat.exists {
                    warn!(path = %self.path, error = %e, "failed to index archive");
                }
                entries.files.clear();
                entries.dirs.clear();
            }
        }
        entries.marker = Some(stat.last_modified);
        stat
    }

    fn entry(&self, name: &str) -> Option<EntryInfo> {
        self.refresh();
        self.entries.read().files.get(name).copied()
    }

    fn has_dir(&self, prefix: &str) -> bool {
        self.refresh();
        self.entries.read().dirs.contains(prefix)
    }

    fn read(&self, name: &str, display_path: &str) -> RepositoryResult<Vec<u8>> {
        let file = File::open(&self.file).map_err(|e| RepositoryError::io(&self.path, e))?;
        let mut archive = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| RepositoryError::archive(&self.path, e))?;
        let mut entry = archive.by_name(name).map_err(|e| match e {
            zip::result::ZipError::FileNotFound => RepositoryError::not_found(display_path),
            other => RepositoryError::archive(&self.path, other),
        })?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| RepositoryError::io(display_path, e))?;
        Ok(bytes)
    }
}

fn scan_archive(
    file: &Path,
    display: &str,
) -> RepositoryResult<(HashMap<String, EntryInfo>, HashSet<String>)> {
    let reader = File::open(file).map_err(|e| RepositoryError::io(display, e))?;
    let mut archive = zip::ZipArchive::new(BufReader::new(reader))
        .map_err(|e| RepositoryError::archive(display, e))?;

    let mut files = HashMap::new();
    let mut dirs = HashSet::new();
    for index in 0..archive.len() {
        let entry = archive
            .by_index(index)
            .map_err(|e| RepositoryError::archive(display, e))?;
        let name = entry.name().to_string();
        for (pos, _) in name.match_indices('/') {
            dirs.insert(name[..=pos].to_string());
        }
        if !entry.is_dir() {
            files.insert(
                name,
                EntryInfo {
                    crc32: entry.crc32(),
                    size: entry.size(),
                },
            );
        }
    }
    Ok((files, dirs))
}

/// A directory inside a zip archive (the archive root has an empty prefix).
#[derive(Debug)]
pub struct ZipRepository {
    self_ref: Weak<ZipRepository>,
    parent: Option<Arc<ZipRepository>>,
    index: Arc<ArchiveIndex>,
    prefix: String,
    path: String,
    name: String,
    resources: Handles<ZipResource>,
    repositories: Handles<ZipRepository>,
}

impl ZipRepository {
    /// Open an archive with the default stat cache window.
    pub fn new(file: impl AsRef<Path>) -> Arc<Self> {
        Self::with_check_interval(file, DEFAULT_CHECK_INTERVAL)
    }

    /// Open an archive, caching the archive stat for `interval`.
    pub fn with_check_interval(file: impl AsRef<Path>, interval: Duration) -> Arc<Self> {
        let file = file.as_ref();
        let file = std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf());
        let path = file.display().to_string();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let index = Arc::new(ArchiveIndex {
            file,
            path,
            stat: StatCache::new(interval),
            entries: RwLock::new(Entries::default()),
        });
        Self::build(index, None, String::new(), name)
    }

    fn build(
        index: Arc<ArchiveIndex>,
        parent: Option<Arc<ZipRepository>>,
        prefix: String,
        name: String,
    ) -> Arc<Self> {
        let path = format!("{}!/{}", index.path, prefix);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            parent,
            index,
            prefix,
            path,
            name,
            resources: Handles::new(),
            repositories: Handles::new(),
        })
    }

    fn child_repository(&self, name: &str) -> Arc<ZipRepository> {
        self.repositories.intern(name, || {
            Self::build(
                Arc::clone(&self.index),
                self.self_ref.upgrade(),
                join_relative(&self.prefix, &format!("{}/", name)),
                name.to_string(),
            )
        })
    }

    fn resource(&self, name: &str) -> Arc<ZipResource> {
        self.resources.intern(name, || {
            let entry = join_relative(&self.prefix, name);
            Arc::new(ZipResource {
                index: Arc::clone(&self.index),
                path: format!("{}!/{}", self.index.path, entry),
                name: name.to_string(),
                entry,
                parent: self.self_ref.upgrade(),
            })
        })
    }

    fn descend(&self, dirs: &[&str]) -> Option<Arc<ZipRepository>> {
        let (first, rest) = dirs.split_first()?;
        let mut repo = self.child_repository(first);
        for name in rest {
            repo = repo.child_repository(name);
        }
        Some(repo)
    }

    /// Direct children of this repository's prefix: (files, dirs).
    fn children(&self) -> (Vec<String>, Vec<String>) {
        self.index.refresh();
        let entries = self.index.entries.read();
        let direct = |full: &str| -> Option<String> {
            let rest = full.strip_prefix(self.prefix.as_str())?;
            let rest = rest.strip_suffix('/').unwrap_or(rest);
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };
        let mut files: Vec<String> = entries.files.keys().filter_map(|k| direct(k)).collect();
        let mut dirs: Vec<String> = entries.dirs.iter().filter_map(|k| direct(k)).collect();
        files.sort();
        dirs.sort();
        (files, dirs)
    }
}

impl Trackable for ZipRepository {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> &str {
        &self.prefix
    }

    fn last_modified(&self) -> i64 {
        self.index.refresh().last_modified
    }

    fn exists(&self) -> bool {
        if self.prefix.is_empty() {
            self.index.refresh().exists
        } else {
            self.index.has_dir(&self.prefix)
        }
    }

    fn url(&self) -> Option<Url> {
        let archive = Url::from_file_path(&self.index.file).ok()?;
        Url::parse(&format!("jar:{}!/{}", archive, self.prefix)).ok()
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .clone()
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Repository for ZipRepository {
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
                Arc::clone(&self.index),
                self.parent.clone(),
                self.prefix.clone(),
                self.name.clone(),
            ),
        }
    }

    fn resources(&self, recursive: bool) -> RepositoryResult<Vec<Arc<dyn Resource>>> {
        let (files, dirs) = self.children();
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
        let (_, dirs) = self.children();
        Ok(dirs
            .iter()
            .map(|name| self.child_repository(name) as Arc<dyn Repository>)
            .collect())
    }

    fn update(&self) {
        self.index.refresh();
    }
}

/// A file entry inside a zip archive.
#[derive(Debug)]
pub struct ZipResource {
    index: Arc<ArchiveIndex>,
    entry: String,
    path: String,
    name: String,
    parent: Option<Arc<ZipRepository>>,
}

impl Trackable for ZipResource {
    fn path(&self) -> &str {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> &str {
        &self.entry
    }

    fn last_modified(&self) -> i64 {
        match self.index.entry(&self.entry) {
            Some(_) => self.index.refresh().last_modified,
            None => 0,
        }
    }

    fn checksum(&self) -> i64 {
        self.index
            .entry(&self.entry)
            .map(|info| info.checksum())
            .unwrap_or(0)
    }

    fn exists(&self) -> bool {
        self.index.entry(&self.entry).is_some()
    }

    fn url(&self) -> Option<Url> {
        let archive = Url::from_file_path(&self.index.file).ok()?;
        Url::parse(&format!("jar:{}!/{}", archive, self.entry)).ok()
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .clone()
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Resource for ZipResource {
    fn bytes(&self) -> RepositoryResult<Vec<u8>> {
        if self.index.entry(&self.entry).is_none() {
            return Err(RepositoryError::not_found(&self.path));
        }
        self.index.read(&self.entry, &self.path)
    }

    fn length(&self) -> u64 {
        self.index
            .entry(&self.entry)
            .map(|info| info.size)
            .unwrap_or(0)
    }
}
