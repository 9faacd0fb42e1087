//! Reloadable scripts: compile, classify and load one module source.
//!
//! A [`ReloadableScript`] exists once per resource and compile mode. It
//! recompiles when the resource checksum moves, remembers compile failures
//! until the source changes again, and decides after each evaluation whether
//! the resulting scope is shared (reused by later loads) or not.
//!
//! A shared script's checksum covers its own resource and every module it
//! transitively required during its last evaluation, so editing a private
//! dependency still invalidates the shared scope that captured it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tern_repository::Resource;
use tracing::{debug, trace};

use crate::context::{Dependencies, EvalContext};
use crate::engine::{CompileMode, CompiledUnit, ModuleHost};
use crate::error::{RuntimeError, RuntimeResult};
use crate::module_scope::{ModuleScope, ModuleScopeRef};
use crate::runtime::Runtime;
use crate::script_cache::CacheEntry;
use crate::syntax_error::SyntaxError;
use crate::value::Value;

/// Whether a script's evaluated scope is reused.
#[derive(Debug, Clone)]
pub enum Sharing {
    /// Not evaluated since the last compile. `previous` is the scope of an
    /// earlier evaluation, kept so it can be reset and reused in place.
    Unclassified { previous: Option<ModuleScopeRef> },
    /// Scope is cached and handed to every loader while it is fresh.
    Shared(ModuleScopeRef),
    /// Every load evaluates into a fresh scope.
    NotShared,
}

impl Sharing {
    pub fn is_unclassified(&self) -> bool {
        matches!(self, Sharing::Unclassified { .. })
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Sharing::Shared(_))
    }

    /// The scope a re-evaluation can reuse.
    fn scope(&self) -> Option<&ModuleScopeRef> {
        match self {
            Sharing::Shared(scope) => Some(scope),
            Sharing::Unclassified { previous } => previous.as_ref(),
            Sharing::NotShared => None,
        }
    }

    /// Forget the classification, keeping the scope for reuse.
    fn unclassify(&mut self) {
        let previous = self.scope().cloned();
        *self = Sharing::Unclassified { previous };
    }

    /// Reopen the classification for an evaluation and return the scope to
    /// evaluate into. An unshared script stays settled until it recompiles.
    fn begin_evaluation(&mut self) -> Option<ModuleScopeRef> {
        if matches!(self, Sharing::NotShared) {
            return None;
        }
        self.unclassify();
        self.scope().cloned()
    }

    /// Settle an open classification. Returns false if it was already
    /// settled, in which case nothing changes.
    fn classify(&mut self, scope: &ModuleScopeRef, shared: bool) -> bool {
        if !self.is_unclassified() {
            return false;
        }
        *self = if shared {
            Sharing::Shared(Arc::clone(scope))
        } else {
            Sharing::NotShared
        };
        true
    }
}

#[derive(Debug, Clone)]
enum Compilation {
    Pending,
    Ready(CompiledUnit),
    Failed(RuntimeError),
}

#[derive(Debug)]
struct ScriptState {
    compilation: Compilation,
    checksum: i64,
    errors: Vec<SyntaxError>,
    sharing: Sharing,
}

/// The compile and load state machine of one module source.
///
/// Equality and hashing go by resource path.
pub struct ReloadableScript {
    resource: Arc<dyn Resource>,
    module_name: String,
    mode: CompileMode,
    state: Mutex<ScriptState>,
    dependencies: Mutex<Dependencies>,
    evaluation: ReentrantMutex<()>,
}

impl ReloadableScript {
    pub fn new(resource: Arc<dyn Resource>, mode: CompileMode) -> Arc<Self> {
        Arc::new(Self {
            module_name: resource.module_name(),
            resource,
            mode,
            state: Mutex::new(ScriptState {
                compilation: Compilation::Pending,
                checksum: 0,
                errors: Vec::new(),
                sharing: Sharing::Unclassified { previous: None },
            }),
            dependencies: Mutex::new(HashMap::new()),
            evaluation: ReentrantMutex::new(()),
        })
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    pub fn path(&self) -> &str {
        self.resource.path()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// Current classification.
    pub fn sharing(&self) -> Sharing {
        self.state.lock().sharing.clone()
    }

    pub fn is_shared(&self) -> bool {
        self.state.lock().sharing.is_shared()
    }

    /// The cached shared scope, if any.
    pub fn shared_scope(&self) -> Option<ModuleScopeRef> {
        match &self.state.lock().sharing {
            Sharing::Shared(scope) => Some(Arc::clone(scope)),
            _ => None,
        }
    }

    /// Syntax errors of the last compilation.
    pub fn syntax_errors(&self) -> Vec<SyntaxError> {
        self.state.lock().errors.clone()
    }

    /// Return the compiled unit, recompiling if the source changed.
    ///
    /// Syntax errors of the last compilation are appended to `ctx` on every
    /// call, and a failed compilation is reported again on every call until
    /// the resource checksum moves.
    pub fn get_script(
        &self,
        runtime: &Runtime,
        ctx: &mut EvalContext,
    ) -> RuntimeResult<CompiledUnit> {
        let mut state = self.state.lock();
        let current = self.resource.checksum();
        let stale = runtime.config().reload && state.checksum != current;
        if matches!(state.compilation, Compilation::Pending) || stale {
            self.compile(runtime, &mut state, current);
        }
        ctx.push_errors(&state.errors);
        match &state.compilation {
            Compilation::Ready(unit) => Ok(Arc::clone(unit)),
            Compilation::Failed(error) => Err(error.clone()),
            Compilation::Pending => Err(RuntimeError::not_found(self.path())),
        }
    }

    fn compile(&self, runtime: &Runtime, state: &mut ScriptState, checksum: i64) {
        state.sharing.unclassify();
        state.errors.clear();
        state.checksum = checksum;

        let path = self.resource.path();
        if self.mode.is_cacheable()
            && let Some(entry) = runtime.script_cache().get(path)
            && entry.checksum() == checksum
        {
            if let Some(unit) = entry.unit() {
                state.compilation = Compilation::Ready(unit);
                state.errors = entry.errors().to_vec();
                return;
            }
            if let Some(failure) = entry.failure() {
                state.compilation = Compilation::Failed(failure.clone());
                state.errors = entry.errors().to_vec();
                return;
            }
        }

        debug!(path = %path, mode = ?self.mode, "compiling module");
        let source = match self.resource.content() {
            Ok(source) => source,
            Err(error) => {
                state.compilation = Compilation::Failed(error.into());
                return;
            }
        };
        let compiled =
            runtime
                .engine()
                .compile(&source, path, self.resource.line_number(), self.mode);
        let entry = match compiled {
            Ok(unit) => {
                let entry = CacheEntry::compiled(&unit, checksum, Vec::new());
                state.compilation = Compilation::Ready(unit);
                entry
            }
            Err(error) => {
                debug!(path = %path, error = %error, "compilation failed");
                state.errors = error.errors.clone();
                let failure = RuntimeError::compile(path, error);
                state.compilation = Compilation::Failed(failure.clone());
                CacheEntry::failed(failure, checksum, state.errors.clone())
            }
        };
        if self.mode.is_cacheable() {
            runtime.script_cache().put(path, entry);
        }
    }

    /// The compiled unit without re-checking the resource.
    fn compiled_unit(&self) -> RuntimeResult<CompiledUnit> {
        match &self.state.lock().compilation {
            Compilation::Ready(unit) => Ok(Arc::clone(unit)),
            Compilation::Failed(error) => Err(error.clone()),
            Compilation::Pending => Err(RuntimeError::not_found(self.path())),
        }
    }

    /// Load the module scope for this script in `ctx`.
    ///
    /// Returns the scope already loaded in this context, else the cached
    /// shared scope while it is fresh, else evaluates the module.
    pub fn load(
        self: &Arc<Self>,
        runtime: &Runtime,
        ctx: &mut EvalContext,
    ) -> RuntimeResult<ModuleScopeRef> {
        if let Some(scope) = ctx.loaded(self.path()) {
            return Ok(scope);
        }
        let unit = self.get_script(runtime, ctx)?;
        if let Some(scope) = self.reusable_scope(runtime) {
            ctx.insert_loaded(self.path(), Arc::clone(&scope));
            return Ok(scope);
        }

        if matches!(self.state.lock().sharing, Sharing::NotShared) {
            return self.evaluate_module(runtime, ctx, unit);
        }

        // An evaluation that decides or refreshes a shared scope runs once;
        // concurrent loaders wait for it and then reuse its result.
        let _guard = self.evaluation.lock();
        let unit = self.compiled_unit()?;
        if let Some(scope) = self.reusable_scope(runtime) {
            trace!(path = %self.path(), "reusing scope classified by another loader");
            ctx.insert_loaded(self.path(), Arc::clone(&scope));
            return Ok(scope);
        }
        self.evaluate_module(runtime, ctx, unit)
    }

    fn reusable_scope(&self, runtime: &Runtime) -> Option<ModuleScopeRef> {
        let scope = self.shared_scope()?;
        if !runtime.config().reload || scope.checksum() == self.checksum() {
            Some(scope)
        } else {
            None
        }
    }

    fn evaluate_module(
        self: &Arc<Self>,
        runtime: &Runtime,
        ctx: &mut EvalContext,
        unit: CompiledUnit,
    ) -> RuntimeResult<ModuleScopeRef> {
        let existing = self.state.lock().sharing.begin_evaluation();
        let scope = match existing {
            Some(scope) => {
                scope.reset();
                scope
            }
            None => ModuleScope::new(Arc::clone(&self.resource), runtime.prototype()),
        };

        ctx.insert_loaded(self.path(), Arc::clone(&scope));
        let result = self.execute(runtime, ctx, &unit, &scope);

        if let Err(error) = result {
            ctx.remove_loaded(self.path());
            self.state.lock().sharing.unclassify();
            runtime.unregister_shared(self);
            return Err(error);
        }

        let shared = scope.is_marked_shared() || runtime.is_main_module(self);
        self.classify(runtime, &scope, shared);
        Ok(scope)
    }

    /// Run `unit` against `scope` and replace the dependency set with the
    /// modules it required. The old set stays visible until then.
    fn execute(
        &self,
        runtime: &Runtime,
        ctx: &mut EvalContext,
        unit: &CompiledUnit,
        scope: &ModuleScopeRef,
    ) -> RuntimeResult<Value> {
        let result = {
            let mut host = ModuleHost::new(runtime, ctx, Arc::clone(scope));
            runtime.engine().execute(unit, &mut host)
        };
        *self.dependencies.lock() = ctx.take_dependencies();
        result.map_err(RuntimeError::from)
    }

    /// Run this script as the main module into the fresh `scope`, which is
    /// always shared afterwards.
    ///
    /// The caller must have pushed this script's loading frame on `ctx`.
    pub(crate) fn run_main(
        self: &Arc<Self>,
        runtime: &Runtime,
        ctx: &mut EvalContext,
        scope: &ModuleScopeRef,
    ) -> RuntimeResult<Value> {
        let _guard = self.evaluation.lock();
        let unit = self.get_script(runtime, ctx)?;
        self.state.lock().sharing.unclassify();

        match self.execute(runtime, ctx, &unit, scope) {
            Ok(value) => {
                self.classify(runtime, scope, true);
                Ok(value)
            }
            Err(error) => {
                runtime.unregister_shared(self);
                Err(error)
            }
        }
    }

    /// Record the classification of a finished evaluation.
    ///
    /// A shared scope gets its checksum stamped before it is published, so
    /// no loader can observe it with a stale checksum.
    fn classify(
        self: &Arc<Self>,
        runtime: &Runtime,
        scope: &ModuleScopeRef,
        shared: bool,
    ) {
        if shared {
            scope.set_checksum(self.nested_checksum(&mut HashSet::new()));
        }
        if !self.state.lock().sharing.classify(scope, shared) {
            trace!(path = %self.path(), "classification already settled");
            return;
        }
        if shared {
            runtime.register_shared(self);
        } else {
            runtime.unregister_shared(self);
        }
        debug!(path = %self.path(), shared, "module classified");
    }

    /// Run the compiled unit against `scope` without module bookkeeping.
    pub fn evaluate(
        &self,
        runtime: &Runtime,
        ctx: &mut EvalContext,
        scope: &ModuleScopeRef,
    ) -> RuntimeResult<Value> {
        let unit = self.get_script(runtime, ctx)?;
        let mut host = ModuleHost::new(runtime, ctx, Arc::clone(scope));
        runtime
            .engine()
            .execute(&unit, &mut host)
            .map_err(RuntimeError::from)
    }

    /// Checksum used to validate a cached scope.
    ///
    /// For a shared script this is the resource checksum plus the checksums
    /// of all modules it transitively depends on, each counted once.
    pub fn checksum(&self) -> i64 {
        if !self.is_shared() {
            return self.resource.checksum();
        }
        let mut visited = HashSet::new();
        self.nested_checksum(&mut visited)
    }

    fn nested_checksum(&self, visited: &mut HashSet<String>) -> i64 {
        if !visited.insert(self.path().to_string()) {
            return 0;
        }
        self.dependencies()
            .iter()
            .fold(self.resource.checksum(), |sum, dependency| {
                sum.wrapping_add(dependency.nested_checksum(visited))
            })
    }

    /// Record that evaluating this script loaded `other`.
    pub fn add_dependency(&self, other: &Arc<ReloadableScript>) {
        if other.path() == self.path() {
            return;
        }
        self.dependencies
            .lock()
            .insert(other.path().to_string(), Arc::downgrade(other));
    }

    /// Scripts loaded during the last evaluation that are still alive.
    pub fn dependencies(&self) -> Vec<Arc<ReloadableScript>> {
        let mut dependencies: Vec<_> = self
            .dependencies
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        dependencies.sort_by(|a, b| a.path().cmp(b.path()));
        dependencies
    }
}

impl PartialEq for ReloadableScript {
    fn eq(&self, other: &Self) -> bool {
        self.path() == other.path()
    }
}

impl Eq for ReloadableScript {}

impl Hash for ReloadableScript {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path().hash(state);
    }
}

impl fmt::Debug for ReloadableScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReloadableScript")
            .field("path", &self.path())
            .field("mode", &self.mode)
            .finish()
    }
}
