//! The script-engine capability the runtime is layered on.
//!
//! The runtime never parses or runs script code itself. It hands source text
//! to a [`ScriptEngine`] and later asks it to run the resulting unit against
//! a module scope. Everything a running module may ask of the runtime goes
//! through the [`ModuleHost`] passed to [`ScriptEngine::execute`].

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::EvalContext;
use crate::error::{CompileError, RuntimeResult, ScriptError};
use crate::module_scope::ModuleScopeRef;
use crate::runtime::Runtime;
use crate::value::{ObjectRef, Value};

/// An engine-specific executable unit. Engines downcast it in `execute`.
pub type CompiledUnit = Arc<dyn Any + Send + Sync>;

/// How sources are compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileMode {
    /// Optimized compilation, results are shared through the script cache
    #[default]
    Optimized,
    /// Debug-friendly compilation, never shared across scripts
    Interpreted,
}

impl CompileMode {
    /// Whether compiled units of this mode may go into the script cache.
    pub fn is_cacheable(self) -> bool {
        matches!(self, CompileMode::Optimized)
    }
}

/// Compile and execute capability of an embedded script engine.
pub trait ScriptEngine: Send + Sync {
    /// Compile `source` into an executable unit.
    ///
    /// `source_name` and `first_line` are used for diagnostics.
    fn compile(
        &self,
        source: &str,
        source_name: &str,
        first_line: u32,
        mode: CompileMode,
    ) -> Result<CompiledUnit, CompileError>;

    /// Run a unit with `host.global()` as its global object.
    fn execute(&self, unit: &CompiledUnit, host: &mut ModuleHost<'_>)
    -> Result<Value, ScriptError>;
}

/// What an executing module can see of the runtime.
pub struct ModuleHost<'a> {
    runtime: &'a Runtime,
    ctx: &'a mut EvalContext,
    scope: ModuleScopeRef,
}

impl<'a> ModuleHost<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        ctx: &'a mut EvalContext,
        scope: ModuleScopeRef,
    ) -> Self {
        Self {
            runtime,
            ctx,
            scope,
        }
    }

    /// The scope the unit is running in.
    pub fn scope(&self) -> &ModuleScopeRef {
        &self.scope
    }

    /// The global object of the running unit.
    pub fn global(&self) -> &ObjectRef {
        self.scope.object()
    }

    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    pub fn context(&mut self) -> &mut EvalContext {
        self.ctx
    }

    /// Load a module and return its exports.
    pub fn require(&mut self, name: &str) -> RuntimeResult<Value> {
        Ok(self.require_scope(name)?.exports())
    }

    /// Load a module relative to the running one and return its scope.
    pub fn require_scope(&mut self, name: &str) -> RuntimeResult<ModuleScopeRef> {
        self.runtime.load_module(self.ctx, name, Some(&self.scope))
    }
}
