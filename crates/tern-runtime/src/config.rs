//! Runtime configuration.
//!
//! Configuration can be built in code or read from a `tern.toml`:
//!
//! ```toml
//! module_path = ["lib", "vendor/modules.zip"]
//! main_module = "app/main"
//! reload = true
//! mode = "optimized"
//! check_interval_ms = 1000
//! cache = { policy = "lru", capacity = 256 }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_repository::{FileRepository, Repository, ZipRepository};

use crate::engine::CompileMode;
use crate::error::{RuntimeError, RuntimeResult};
use crate::script_cache::CacheRetention;

/// Config file names searched by [`RuntimeConfig::discover`], in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["tern.toml", ".ternrc.toml"];

/// Settings of a [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Repository roots searched for non-relative module names, in order.
    pub module_path: Vec<PathBuf>,

    /// Module name of the entry module. Its scope is always shared.
    pub main_module: Option<String>,

    /// Re-validate checksums on every load.
    /// Default: true
    pub reload: bool,

    /// Compile mode for new evaluation contexts.
    /// Default: optimized
    pub mode: CompileMode,

    /// How long filesystem stats are served from cache, in milliseconds.
    /// Default: 1000
    pub check_interval_ms: u64,

    /// Retention of the compiled-unit cache.
    /// Default: weak
    pub cache: CacheRetention,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module_path: Vec::new(),
            main_module: None,
            reload: true,
            mode: CompileMode::Optimized,
            check_interval_ms: 1000,
            cache: CacheRetention::Weak,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a repository root to the module path.
    pub fn module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_path.push(path.into());
        self
    }

    /// Set the entry module name.
    pub fn main_module(mut self, name: impl Into<String>) -> Self {
        self.main_module = Some(name.into());
        self
    }

    /// Enable or disable checksum re-validation.
    pub fn reload(mut self, enabled: bool) -> Self {
        self.reload = enabled;
        self
    }

    pub fn mode(mut self, mode: CompileMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn cache(mut self, retention: CacheRetention) -> Self {
        self.cache = retention;
        self
    }

    /// Stat cache window for filesystem repositories.
    pub fn check_interval_duration(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> RuntimeResult<Self> {
        toml::from_str(content).map_err(|e| RuntimeError::config(e.to_string()))
    }

    /// Read a config file. Relative module path entries are resolved
    /// against the directory containing the file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> RuntimeResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| {
            RuntimeError::config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        if let Some(base) = path.parent() {
            config.module_path = config
                .module_path
                .into_iter()
                .map(|entry| {
                    if entry.is_relative() {
                        base.join(entry)
                    } else {
                        entry
                    }
                })
                .collect();
        }
        Ok(config)
    }

    /// Find a config file in `dir` or its ancestors.
    pub fn find_config_file(dir: impl AsRef<Path>) -> Option<PathBuf> {
        let mut current = Some(dir.as_ref());
        while let Some(dir) = current {
            for name in CONFIG_FILE_NAMES {
                let path = dir.join(name);
                if path.is_file() {
                    return Some(path);
                }
            }
            current = dir.parent();
        }
        None
    }

    /// Load the nearest config file above `dir`, or the defaults.
    pub fn discover(dir: impl AsRef<Path>) -> RuntimeResult<Self> {
        match Self::find_config_file(dir) {
            Some(path) => Self::from_toml_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Open the module path as repositories: directories become file
    /// repositories, `.zip` and `.jar` files archive repositories.
    pub fn search_path(&self) -> RuntimeResult<Vec<Arc<dyn Repository>>> {
        let interval = self.check_interval_duration();
        self.module_path
            .iter()
            .map(|entry| -> RuntimeResult<Arc<dyn Repository>> {
                if entry.is_dir() {
                    let repo = FileRepository::with_check_interval(entry, interval);
                    return Ok(repo as Arc<dyn Repository>);
                }
                let is_archive = entry
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| {
                        ext.eq_ignore_ascii_case("zip") || ext.eq_ignore_ascii_case("jar")
                    });
                if is_archive && entry.is_file() {
                    let repo = ZipRepository::with_check_interval(entry, interval);
                    return Ok(repo as Arc<dyn Repository>);
                }
                Err(RuntimeError::config(format!(
                    "module path entry '{}' is neither a directory nor an archive",
                    entry.display()
                )))
            })
            .collect()
    }
}
