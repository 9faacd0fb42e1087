//! Module loading orchestration.
//!
//! [`Runtime`] resolves module names against repositories, keeps one
//! [`ReloadableScript`] per resource and compile mode, and tracks which
//! scripts are shared. All per-request state lives in an [`EvalContext`].

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tern_repository::{Repository, Resource, root_repository, split_path};
use tracing::debug;

use crate::config::RuntimeConfig;
use crate::context::EvalContext;
use crate::engine::{CompileMode, CompiledUnit, ScriptEngine};
use crate::error::{RuntimeError, RuntimeResult, ScriptError};
use crate::module_scope::{ModuleScope, ModuleScopeRef};
use crate::reloadable::ReloadableScript;
use crate::script_cache::ScriptCache;
use crate::value::{JsObject, NativeFunction, ObjectRef, Value};

/// Extension tried when a module name does not resolve as is.
const MODULE_EXTENSION: &str = ".js";

/// A module to invoke a function on.
#[derive(Debug, Clone)]
pub enum ModuleRef {
    /// Load the module by name
    Name(String),
    /// Use an already loaded scope
    Scope(ModuleScopeRef),
}

impl From<&str> for ModuleRef {
    fn from(name: &str) -> Self {
        ModuleRef::Name(name.to_string())
    }
}

impl From<String> for ModuleRef {
    fn from(name: String) -> Self {
        ModuleRef::Name(name)
    }
}

impl From<ModuleScopeRef> for ModuleRef {
    fn from(scope: ModuleScopeRef) -> Self {
        ModuleRef::Scope(scope)
    }
}

/// The module runtime.
///
/// A runtime is shared between threads; every logical request uses its own
/// [`EvalContext`].
pub struct Runtime {
    config: RuntimeConfig,
    engine: Arc<dyn ScriptEngine>,
    search_path: Vec<Arc<dyn Repository>>,
    prototype: ObjectRef,
    optimized: DashMap<String, Arc<ReloadableScript>>,
    interpreted: DashMap<String, Arc<ReloadableScript>>,
    shared: DashMap<String, Arc<ReloadableScript>>,
    cache: ScriptCache,
    main_path: RwLock<Option<String>>,
}

impl Runtime {
    /// Create a runtime searching the configured module path.
    pub fn new(config: RuntimeConfig, engine: Arc<dyn ScriptEngine>) -> RuntimeResult<Self> {
        let search_path = config.search_path()?;
        Ok(Self::with_search_path(config, engine, search_path))
    }

    /// Create a runtime with explicit repository roots.
    pub fn with_search_path(
        config: RuntimeConfig,
        engine: Arc<dyn ScriptEngine>,
        search_path: Vec<Arc<dyn Repository>>,
    ) -> Self {
        Self {
            cache: ScriptCache::new(config.cache),
            config,
            engine,
            search_path,
            prototype: JsObject::new(),
            optimized: DashMap::new(),
            interpreted: DashMap::new(),
            shared: DashMap::new(),
            main_path: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.engine.as_ref()
    }

    pub fn search_path(&self) -> &[Arc<dyn Repository>] {
        &self.search_path
    }

    pub fn script_cache(&self) -> &ScriptCache {
        &self.cache
    }

    /// Prototype of every module scope. Globals defined here are visible
    /// to all modules.
    pub fn prototype(&self) -> &ObjectRef {
        &self.prototype
    }

    /// Define a global value visible to every module.
    pub fn define_global(&self, name: &str, value: Value) {
        self.prototype.define(name, value, false);
    }

    /// Expose a host function to every module.
    pub fn register_function<F>(&self, name: &str, func: F)
    where
        F: Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        self.define_global(name, Value::Function(NativeFunction::new(name, func)));
    }

    /// A fresh evaluation context in the configured mode.
    pub fn context(&self) -> EvalContext {
        EvalContext::new(self.config.mode)
    }

    /// Load module `name` and return its scope.
    pub fn load(&self, name: &str) -> RuntimeResult<ModuleScopeRef> {
        let mut ctx = self.context();
        self.load_module(&mut ctx, name, None)
    }

    /// Load module `name` in `ctx`.
    ///
    /// Names starting with `./` or `../` resolve against the repository of
    /// `loading_scope`, other names against the search path. Loading the
    /// same module twice in one context yields the same scope.
    pub fn load_module(
        &self,
        ctx: &mut EvalContext,
        name: &str,
        loading_scope: Option<&ModuleScopeRef>,
    ) -> RuntimeResult<ModuleScopeRef> {
        let resource = self
            .resolve(name, loading_scope)
            .ok_or_else(|| RuntimeError::not_found(name))?;
        let script = self.script_for(resource, ctx.mode());

        ctx.record_dependency(&script);
        ctx.push_loading(Arc::clone(&script));
        let result = script.load(self, ctx);
        ctx.pop_loading();
        result
    }

    /// Resolve a module name to an existing resource.
    pub fn resolve(
        &self,
        name: &str,
        loading_scope: Option<&ModuleScopeRef>,
    ) -> Option<Arc<dyn Resource>> {
        let relative = name.starts_with("./") || name.starts_with("../");
        if relative
            && let Some(repository) = loading_scope.and_then(|scope| scope.repository())
        {
            let path = format!("{}{}", repository.relative_path(), name);
            let root = root_repository(repository);
            return find_module(root.as_ref(), &path);
        }
        let name = split_path(name).join("/");
        self.search_path
            .iter()
            .find_map(|repository| find_module(repository.as_ref(), &name))
    }

    /// Compile `resource` in the configured mode.
    pub fn get_script(&self, resource: Arc<dyn Resource>) -> RuntimeResult<CompiledUnit> {
        let mut ctx = self.context();
        self.get_script_in(&mut ctx, resource)
    }

    /// Compile `resource` in the mode of `ctx`, collecting syntax errors there.
    pub fn get_script_in(
        &self,
        ctx: &mut EvalContext,
        resource: Arc<dyn Resource>,
    ) -> RuntimeResult<CompiledUnit> {
        self.script_for(resource, ctx.mode()).get_script(self, ctx)
    }

    /// Run `resource` as the main module and return its completion value.
    pub fn run_script(
        &self,
        resource: Arc<dyn Resource>,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let mut ctx = self.context();
        self.run_script_in(&mut ctx, resource, args)
    }

    /// Run `resource` as the main module in `ctx`. `args` are exposed to the
    /// script as `module.args`.
    pub fn run_script_in(
        &self,
        ctx: &mut EvalContext,
        resource: Arc<dyn Resource>,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let path = resource.path().to_string();
        *self.main_path.write() = Some(path.clone());

        let script = self.script_for(Arc::clone(&resource), ctx.mode());
        let scope = ModuleScope::new(resource, &self.prototype);
        scope.meta().set("args", Value::array(args.iter().cloned()));
        ctx.insert_loaded(&path, Arc::clone(&scope));

        ctx.push_loading(Arc::clone(&script));
        let result = script.run_main(self, ctx, &scope);
        ctx.pop_loading();
        result
    }

    /// Call `function` of `module` with `args`.
    ///
    /// The function is looked up on the module exports, then on its scope.
    /// If the call asks for a retry, the modules loaded so far are forgotten
    /// and the invocation runs once more.
    pub fn invoke(
        &self,
        module: impl Into<ModuleRef>,
        function: &str,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let mut ctx = self.context();
        self.invoke_in(&mut ctx, module.into(), function, args)
    }

    pub fn invoke_in(
        &self,
        ctx: &mut EvalContext,
        module: ModuleRef,
        function: &str,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        match self.try_invoke(ctx, &module, function, args) {
            Err(error) if error.is_retry_requested() => {
                debug!(function = %function, "invocation requested a retry");
                ctx.clear_loaded();
                self.try_invoke(ctx, &module, function, args)
            }
            result => result,
        }
    }

    fn try_invoke(
        &self,
        ctx: &mut EvalContext,
        module: &ModuleRef,
        function: &str,
        args: &[Value],
    ) -> RuntimeResult<Value> {
        let scope = match module {
            ModuleRef::Name(name) => self.load_module(ctx, name, None)?,
            ModuleRef::Scope(scope) => Arc::clone(scope),
        };
        let target = scope
            .exports()
            .get(function)
            .or_else(|| scope.object().get(function));
        match target {
            Some(Value::Function(func)) => func.call(args).map_err(RuntimeError::from),
            _ => Err(RuntimeError::NotAFunction {
                module: scope.module_name().to_string(),
                function: function.to_string(),
            }),
        }
    }

    /// The shared script registered for the resource at `path`.
    pub fn shared_script(&self, path: &str) -> Option<Arc<ReloadableScript>> {
        self.shared.get(path).map(|s| Arc::clone(s.value()))
    }

    /// Forget all scripts and compiled units.
    pub fn clear_caches(&self) {
        self.optimized.clear();
        self.interpreted.clear();
        self.shared.clear();
        self.cache.clear();
    }

    /// The script for `resource` in `mode`, created on first use.
    pub fn script_for(
        &self,
        resource: Arc<dyn Resource>,
        mode: CompileMode,
    ) -> Arc<ReloadableScript> {
        let path = resource.path();
        if let Some(script) = self.shared.get(path)
            && script.mode() == mode
        {
            return Arc::clone(script.value());
        }
        self.scripts(mode)
            .entry(path.to_string())
            .or_insert_with(|| ReloadableScript::new(Arc::clone(&resource), mode))
            .clone()
    }

    fn scripts(&self, mode: CompileMode) -> &DashMap<String, Arc<ReloadableScript>> {
        match mode {
            CompileMode::Optimized => &self.optimized,
            CompileMode::Interpreted => &self.interpreted,
        }
    }

    pub(crate) fn is_main_module(&self, script: &ReloadableScript) -> bool {
        self.config.main_module.as_deref() == Some(script.module_name())
            || self.main_path.read().as_deref() == Some(script.path())
    }

    pub(crate) fn register_shared(&self, script: &Arc<ReloadableScript>) {
        self.shared.insert(script.path().to_string(), Arc::clone(script));
    }

    pub(crate) fn unregister_shared(&self, script: &ReloadableScript) {
        self.shared.remove_if(script.path(), |_, registered| {
            registered.mode() == script.mode()
        });
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("search_path", &self.search_path)
            .field("scripts", &(self.optimized.len() + self.interpreted.len()))
            .field("shared", &self.shared.len())
            .finish()
    }
}

/// Try `name`, `name.js` and `name/index.js` in `repository`.
fn find_module(repository: &dyn Repository, name: &str) -> Option<Arc<dyn Resource>> {
    if name.is_empty() {
        return None;
    }
    let candidates = [
        name.to_string(),
        format!("{}{}", name, MODULE_EXTENSION),
        format!("{}/index{}", name, MODULE_EXTENSION),
    ];
    candidates
        .iter()
        .map(|candidate| repository.get_resource(candidate))
        .find(|resource| resource.exists())
}
