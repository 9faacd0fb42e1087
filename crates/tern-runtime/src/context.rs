//! Per-evaluation state threaded through module loading.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::engine::CompileMode;
use crate::module_scope::ModuleScopeRef;
use crate::reloadable::ReloadableScript;
use crate::syntax_error::SyntaxError;

/// Scripts loaded while one module body runs, keyed by path.
pub(crate) type Dependencies = HashMap<String, Weak<ReloadableScript>>;

/// A module whose body is running, with the modules it has required so far.
#[derive(Debug)]
struct LoadingFrame {
    script: Arc<ReloadableScript>,
    dependencies: Dependencies,
}

/// State of one logical evaluation: a top-level load or invocation and
/// everything it transitively requires.
///
/// Within one context a module is evaluated at most once; requiring it again
/// (including from inside a require cycle) yields the same scope.
#[derive(Debug)]
pub struct EvalContext {
    mode: CompileMode,
    loaded: HashMap<String, ModuleScopeRef>,
    loading: Vec<LoadingFrame>,
    errors: Vec<SyntaxError>,
}

impl EvalContext {
    pub fn new(mode: CompileMode) -> Self {
        Self {
            mode,
            loaded: HashMap::new(),
            loading: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// Scope already loaded for the resource at `path` in this context.
    pub fn loaded(&self, path: &str) -> Option<ModuleScopeRef> {
        self.loaded.get(path).cloned()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    /// Forget every module loaded so far, forcing fresh loads.
    pub fn clear_loaded(&mut self) {
        self.loaded.clear();
    }

    /// Syntax errors collected by compilations in this context.
    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    /// Drain the collected syntax errors.
    pub fn take_errors(&mut self) -> Vec<SyntaxError> {
        std::mem::take(&mut self.errors)
    }

    pub(crate) fn insert_loaded(&mut self, path: &str, scope: ModuleScopeRef) {
        self.loaded.insert(path.to_string(), scope);
    }

    pub(crate) fn remove_loaded(&mut self, path: &str) {
        self.loaded.remove(path);
    }

    pub(crate) fn push_errors(&mut self, errors: &[SyntaxError]) {
        self.errors.extend_from_slice(errors);
    }

    pub(crate) fn push_loading(&mut self, script: Arc<ReloadableScript>) {
        self.loading.push(LoadingFrame {
            script,
            dependencies: HashMap::new(),
        });
    }

    pub(crate) fn pop_loading(&mut self) {
        self.loading.pop();
    }

    /// Note that the running module required `script`. Self-requires are
    /// ignored.
    pub(crate) fn record_dependency(&mut self, script: &Arc<ReloadableScript>) {
        if let Some(frame) = self.loading.last_mut()
            && frame.script.path() != script.path()
        {
            frame
                .dependencies
                .insert(script.path().to_string(), Arc::downgrade(script));
        }
    }

    /// Drain the modules recorded for the running module.
    pub(crate) fn take_dependencies(&mut self) -> Dependencies {
        self.loading
            .last_mut()
            .map(|frame| std::mem::take(&mut frame.dependencies))
            .unwrap_or_default()
    }
}

impl Default for EvalContext {
    fn default() -> Self {
        Self::new(CompileMode::default())
    }
}
