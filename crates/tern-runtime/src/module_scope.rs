//! Module scopes: the global object a module body runs against.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use tern_repository::{Repository, Resource};

use crate::value::{JsObject, ObjectRef, Value};

pub type ModuleScopeRef = Arc<ModuleScope>;

/// The scope of one module evaluation.
///
/// The scope object carries two non-enumerable properties: `exports`, the
/// object the body attaches its public surface to, and `module`, a meta
/// object with `id`, `path`, `directory`, `uri` and `exports`. The body may
/// set `module.shared = true` to have its scope reused across evaluations.
pub struct ModuleScope {
    resource: Arc<dyn Resource>,
    module_name: String,
    object: ObjectRef,
    meta: ObjectRef,
    checksum: AtomicI64,
}

impl ModuleScope {
    /// Create a scope for `resource` whose reads fall through to `prototype`.
    pub fn new(resource: Arc<dyn Resource>, prototype: &ObjectRef) -> ModuleScopeRef {
        let module_name = resource.module_name();
        let object = JsObject::with_prototype(Arc::clone(prototype));
        let exports = JsObject::new();

        let meta = JsObject::new();
        meta.set("id", Value::string(&module_name));
        meta.set("path", Value::string(resource.path()));
        let directory = resource
            .parent_repository()
            .map(|repo| repo.path().to_string())
            .unwrap_or_default();
        meta.set("directory", Value::from(directory));
        if let Some(url) = resource.url() {
            meta.set("uri", Value::from(url.to_string()));
        }
        meta.set("exports", Value::Object(Arc::clone(&exports)));

        object.define("exports", Value::Object(exports), false);
        object.define("module", Value::Object(Arc::clone(&meta)), false);

        Arc::new(Self {
            resource,
            module_name,
            object,
            meta,
            checksum: AtomicI64::new(0),
        })
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    /// The repository containing the module source.
    pub fn repository(&self) -> Option<Arc<dyn Repository>> {
        self.resource.parent_repository()
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn path(&self) -> &str {
        self.resource.path()
    }

    /// The global object of the module.
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    /// The `module` meta object.
    pub fn meta(&self) -> &ObjectRef {
        &self.meta
    }

    /// Current `module.exports`; a body may have replaced it wholesale.
    pub fn exports(&self) -> Value {
        self.meta.get_own("exports").unwrap_or_default()
    }

    /// Whether the body asked for its scope to be shared.
    pub fn is_marked_shared(&self) -> bool {
        matches!(self.meta.get_own("shared"), Some(Value::Bool(true)))
    }

    /// Prepare for re-evaluation: fresh exports, no `shared` override.
    pub fn reset(&self) {
        let exports = JsObject::new();
        self.object
            .define("exports", Value::Object(Arc::clone(&exports)), false);
        self.meta.set("exports", Value::Object(exports));
        self.meta.delete("shared");
    }

    /// Checksum of the evaluation that produced the current exports.
    pub fn checksum(&self) -> i64 {
        self.checksum.load(Ordering::SeqCst)
    }

    pub fn set_checksum(&self, checksum: i64) {
        self.checksum.store(checksum, Ordering::SeqCst);
    }
}

impl fmt::Display for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ModuleScope {}]", self.resource.path())
    }
}

impl fmt::Debug for ModuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("path", &self.resource.path())
            .field("module_name", &self.module_name)
            .field("checksum", &self.checksum())
            .finish()
    }
}
