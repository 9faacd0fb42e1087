//! Trackable resources and repositories for the tern module runtime.
//!
//! A [`Repository`] is a hierarchical container of [`Resource`]s; both are
//! [`Trackable`]: they expose a canonical path, an existence check, a
//! last-modified stamp and a checksum that changes with their content.
//! Staleness detection in the runtime is built entirely on these traits.
//!
//! # Backends
//!
//! - [`FileRepository`] / [`FileResource`]: a directory tree on disk
//! - [`ZipRepository`] / [`ZipResource`]: entries of a zip archive
//! - [`MemoryRepository`] / [`MemoryResource`]: in-memory sources
//! - [`StringResource`]: a stand-alone in-memory source
//!
//! # Example
//!
//! ```
//! use tern_repository::{MemoryRepository, Repository, Resource, Trackable};
//!
//! let repo = MemoryRepository::new("app");
//! repo.set_source("lib/util.js", "module.exports.answer = 42;");
//!
//! let util = repo.get_resource("lib/util.js");
//! assert!(util.exists());
//! assert_eq!(util.module_name(), "lib/util");
//!
//! let missing = repo.get_resource("lib/missing.js");
//! assert!(!missing.exists());
//! ```

pub mod archive;
pub mod error;
pub mod file;
pub mod memory;
pub mod trackable;

pub use archive::{ZipRepository, ZipResource};
pub use error::{RepositoryError, RepositoryResult};
pub use file::{FileRepository, FileResource};
pub use memory::{MemoryRepository, MemoryResource, StringResource};
pub use trackable::{
    DEFAULT_CHECK_INTERVAL, Repository, Resource, Stat, StatCache, Trackable, root_repository,
    split_path, strip_extension,
};
