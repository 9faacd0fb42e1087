//! In-memory repositories and string resources.
//!
//! [`MemoryRepository`] holds text sources keyed by path. Every content
//! change stamps the resource with the next value of a counter shared by
//! the whole tree, which serves as both last-modified marker and checksum.
//! The tree owns its children, so child handles point back at their
//! parent weakly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{RepositoryError, RepositoryResult};
use crate::trackable::{
    Repository, Resource, Trackable, join_relative, split_path, system_time_millis,
};

/// A tree of in-memory text resources.
#[derive(Debug)]
pub struct MemoryRepository {
    self_ref: Weak<MemoryRepository>,
    parent: Option<Weak<MemoryRepository>>,
    clock: Arc<AtomicI64>,
    modified: AtomicI64,
    path: String,
    name: String,
    relative: String,
    resources: DashMap<String, Arc<MemoryResource>>,
    repositories: DashMap<String, Arc<MemoryRepository>>,
}

impl MemoryRepository {
    /// Create an empty root repository. `name` becomes part of every path
    /// (`memory:{name}/...`).
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Self::build(
            None,
            Arc::new(AtomicI64::new(0)),
            format!("memory:{}/", name),
            name,
            String::new(),
        )
    }

    fn build(
        parent: Option<Weak<MemoryRepository>>,
        clock: Arc<AtomicI64>,
        path: String,
        name: String,
        relative: String,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            parent,
            clock,
            modified: AtomicI64::new(0),
            path,
            name,
            relative,
            resources: DashMap::new(),
            repositories: DashMap::new(),
        })
    }

    /// Set the content of the resource at `path`, creating it if needed.
    pub fn set_source(&self, path: &str, content: impl Into<String>) -> Arc<MemoryResource> {
        let resource = self.lookup(path);
        resource.replace(Some(content.into()));
        resource
    }

    /// Remove the content at `path`; the handle stays as a placeholder.
    pub fn remove_source(&self, path: &str) {
        self.lookup(path).replace(None);
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn lookup(&self, path: &str) -> Arc<MemoryResource> {
        let segments = split_path(path);
        let Some((name, dirs)) = segments.split_last() else {
            return self.resource("");
        };
        match self.descend(dirs) {
            Some(repo) => repo.resource(name),
            None => self.resource(name),
        }
    }

    fn child_repository(&self, name: &str) -> Arc<MemoryRepository> {
        self.repositories
            .entry(name.to_string())
            .or_insert_with(|| {
                Self::build(
                    Some(self.self_ref.clone()),
                    Arc::clone(&self.clock),
                    format!("{}{}/", self.path, name),
                    name.to_string(),
                    join_relative(&self.relative, &format!("{}/", name)),
                )
            })
            .clone()
    }

    fn resource(&self, name: &str) -> Arc<MemoryResource> {
        self.resources
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MemoryResource {
                    path: format!("{}{}", self.path, name),
                    name: name.to_string(),
                    relative: join_relative(&self.relative, name),
                    parent: self.self_ref.clone(),
                    content: RwLock::new(None),
                    modified: AtomicI64::new(0),
                })
            })
            .clone()
    }

    fn descend(&self, dirs: &[&str]) -> Option<Arc<MemoryRepository>> {
        let (first, rest) = dirs.split_first()?;
        let mut repo = self.child_repository(first);
        for name in rest {
            repo = repo.child_repository(name);
        }
        Some(repo)
    }
}

impl Trackable for MemoryRepository {
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
        self.modified.load(Ordering::SeqCst)
    }

    fn exists(&self) -> bool {
        self.parent.is_none()
            || self.resources.iter().any(|r| r.exists())
            || self.repositories.iter().any(|r| r.exists())
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Repository for MemoryRepository {
    fn get_resource(&self, path: &str) -> Arc<dyn Resource> {
        self.lookup(path)
    }

    fn get_child_repository(&self, path: &str) -> Arc<dyn Repository> {
        let segments = split_path(path);
        if let Some(repo) = self.descend(&segments) {
            return repo;
        }
        match self.self_ref.upgrade() {
            Some(this) => this,
            None => Self::build(
                self.parent.clone(),
                Arc::clone(&self.clock),
                self.path.clone(),
                self.name.clone(),
                self.relative.clone(),
            ),
        }
    }

    fn resources(&self, recursive: bool) -> RepositoryResult<Vec<Arc<dyn Resource>>> {
        let mut resources: Vec<Arc<dyn Resource>> = self
            .resources
            .iter()
            .filter(|r| r.exists())
            .map(|r| Arc::clone(r.value()) as Arc<dyn Resource>)
            .collect();
        if recursive {
            let children: Vec<_> = self
                .repositories
                .iter()
                .map(|r| Arc::clone(r.value()))
                .collect();
            for child in children {
                resources.extend(child.resources(true)?);
            }
        }
        resources.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(resources)
    }

    fn repositories(&self) -> RepositoryResult<Vec<Arc<dyn Repository>>> {
        let mut repos: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.exists())
            .map(|r| Arc::clone(r.value()) as Arc<dyn Repository>)
            .collect();
        repos.sort_by(|a, b| a.path().cmp(b.path()));
        Ok(repos)
    }

    fn update(&self) {}
}

/// A text resource inside a [`MemoryRepository`].
#[derive(Debug)]
pub struct MemoryResource {
    path: String,
    name: String,
    relative: String,
    parent: Weak<MemoryRepository>,
    content: RwLock<Option<String>>,
    modified: AtomicI64,
}

impl MemoryResource {
    /// Replace the content and stamp a new version.
    pub fn set_content(&self, content: impl Into<String>) {
        self.replace(Some(content.into()));
    }

    fn replace(&self, content: Option<String>) {
        let stamp = match self.parent.upgrade() {
            Some(parent) => {
                let stamp = parent.tick();
                parent.modified.store(stamp, Ordering::SeqCst);
                stamp
            }
            None => self.modified.load(Ordering::SeqCst) + 1,
        };
        *self.content.write() = content;
        self.modified.store(stamp, Ordering::SeqCst);
    }
}

impl Trackable for MemoryResource {
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
        self.modified.load(Ordering::SeqCst)
    }

    fn exists(&self) -> bool {
        self.content.read().is_some()
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        self.parent
            .upgrade()
            .map(|parent| parent as Arc<dyn Repository>)
    }
}

impl Resource for MemoryResource {
    fn bytes(&self) -> RepositoryResult<Vec<u8>> {
        self.content
            .read()
            .as_ref()
            .map(|c| c.as_bytes().to_vec())
            .ok_or_else(|| RepositoryError::not_found(&self.path))
    }

    fn content(&self) -> RepositoryResult<String> {
        self.content
            .read()
            .clone()
            .ok_or_else(|| RepositoryError::not_found(&self.path))
    }

    fn length(&self) -> u64 {
        self.content
            .read()
            .as_ref()
            .map(|c| c.len() as u64)
            .unwrap_or(0)
    }
}

/// A stand-alone, immutable in-memory source.
#[derive(Debug)]
pub struct StringResource {
    name: String,
    content: String,
    created: i64,
    checksum: i64,
}

impl StringResource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Arc<Self> {
        let content = content.into();
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Arc::new(Self {
            name: name.into(),
            checksum: hasher.finish() as i64,
            created: system_time_millis(SystemTime::now()),
            content,
        })
    }
}

impl Trackable for StringResource {
    fn path(&self) -> &str {
        &self.name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn relative_path(&self) -> &str {
        &self.name
    }

    fn last_modified(&self) -> i64 {
        self.created
    }

    fn checksum(&self) -> i64 {
        self.checksum
    }

    fn exists(&self) -> bool {
        true
    }

    fn parent_repository(&self) -> Option<Arc<dyn Repository>> {
        None
    }
}

impl Resource for StringResource {
    fn bytes(&self) -> RepositoryResult<Vec<u8>> {
        Ok(self.content.as_bytes().to_vec())
    }

    fn content(&self) -> RepositoryResult<String> {
        Ok(self.content.clone())
    }

    fn length(&self) -> u64 {
        self.content.len() as u64
    }
}
