//! Module loading and hot reload for embedded script engines.
//!
//! `tern-runtime` resolves module names to resources, compiles them through
//! a [`ScriptEngine`], evaluates them into isolated [`ModuleScope`]s and
//! re-evaluates only what changed when sources are edited.
//!
//! # Modules
//!
//! A module body runs against its own scope object. It publishes values by
//! attaching them to `exports` (or replacing `module.exports`), loads other
//! modules through [`ModuleHost::require`], and may set
//! `module.shared = true` to have one scope reused by every loader for as
//! long as neither the module nor anything it required has changed. The
//! configured main module is always shared.
//!
//! # Reloading
//!
//! With [`RuntimeConfig::reload`] enabled, every load compares resource
//! checksums: a changed source is recompiled, and a shared scope is
//! re-evaluated in place once its own source or any transitive dependency
//! changed. Compile failures are reported on every load until the source
//! changes again.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tern_runtime::{Runtime, RuntimeConfig};
//!
//! let config = RuntimeConfig::discover(".")?;
//! let runtime = Runtime::new(config, Arc::new(MyEngine::new()))?;
//! let scope = runtime.load("app/main")?;
//! let answer = runtime.invoke(scope, "handle", &[])?;
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod module_scope;
pub mod reloadable;
pub mod runtime;
pub mod script_cache;
pub mod syntax_error;
pub mod value;

pub use config::{CONFIG_FILE_NAMES, RuntimeConfig};
pub use context::EvalContext;
pub use engine::{CompileMode, CompiledUnit, ModuleHost, ScriptEngine};
pub use error::{CompileError, RuntimeError, RuntimeResult, ScriptError};
pub use module_scope::{ModuleScope, ModuleScopeRef};
pub use reloadable::{ReloadableScript, Sharing};
pub use runtime::{ModuleRef, Runtime};
pub use script_cache::{CacheEntry, CacheRetention, ScriptCache};
pub use syntax_error::{SyntaxError, format_errors};
pub use value::{JsObject, NativeFunction, ObjectRef, Value};

pub use tern_repository as repository;
