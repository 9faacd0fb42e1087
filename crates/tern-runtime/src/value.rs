//! Script-visible values.
//!
//! The runtime never interprets script semantics; it only needs enough of a
//! value model to build module scopes, hand `exports` objects around and call
//! functions a module exported. Engines convert between their own values and
//! [`Value`] at the [`crate::engine::ScriptEngine`] boundary.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::ScriptError;

/// Shared handle to a [`JsObject`]. Identity is pointer identity.
pub type ObjectRef = Arc<JsObject>;

/// Signature of a host function callable from scripts.
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync;

/// A script value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Array(Arc<[Value]>),
    Object(ObjectRef),
    Function(NativeFunction),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    pub fn array(values: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(values.into_iter().collect())
    }

    pub fn object(object: ObjectRef) -> Self {
        Value::Object(object)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&NativeFunction> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Property lookup that works on objects and yields `None` otherwise.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|object| object.get(key))
    }

    /// The `typeof` name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null | Value::Array(_) | Value::Object(_) => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
        }
    }
}

/// Strict equality: primitives by value, objects and functions by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(values) => f.debug_list().entries(values.iter()).finish(),
            Value::Object(object) => write!(f, "{:?}", object),
            Value::Function(function) => write!(f, "{:?}", function),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<NativeFunction> for Value {
    fn from(function: NativeFunction) -> Self {
        Value::Function(function)
    }
}

#[derive(Clone)]
struct Property {
    value: Value,
    enumerable: bool,
}

/// A property bag with an optional prototype.
///
/// Reads fall through to the prototype chain, writes always land on the
/// object itself.
pub struct JsObject {
    properties: RwLock<HashMap<String, Property>>,
    prototype: Option<ObjectRef>,
}

impl JsObject {
    /// Create an empty object without prototype.
    pub fn new() -> ObjectRef {
        Arc::new(Self {
            properties: RwLock::new(HashMap::new()),
            prototype: None,
        })
    }

    /// Create an empty object whose reads fall through to `prototype`.
    pub fn with_prototype(prototype: ObjectRef) -> ObjectRef {
        Arc::new(Self {
            properties: RwLock::new(HashMap::new()),
            prototype: Some(prototype),
        })
    }

    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    /// Look a property up on this object and then along the prototype chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.get_own(key) {
            return Some(value);
        }
        let mut next = self.prototype.clone();
        while let Some(object) = next {
            if let Some(value) = object.get_own(key) {
                return Some(value);
            }
            next = object.prototype.clone();
        }
        None
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        self.properties.read().get(key).map(|p| p.value.clone())
    }

    /// Assign a property. Existing properties keep their enumerability,
    /// new ones are enumerable.
    pub fn set(&self, key: &str, value: Value) {
        let mut properties = self.properties.write();
        match properties.get_mut(key) {
            Some(property) => property.value = value,
            None => {
                properties.insert(
                    key.to_string(),
                    Property {
                        value,
                        enumerable: true,
                    },
                );
            }
        }
    }

    /// Define a property with explicit enumerability, replacing any
    /// existing one.
    pub fn define(&self, key: &str, value: Value, enumerable: bool) {
        self.properties
            .write()
            .insert(key.to_string(), Property { value, enumerable });
    }

    /// Remove an own property. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        self.properties.write().remove(key).is_some()
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.properties.read().contains_key(key)
    }

    /// Own enumerable property names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .properties
            .read()
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn is_enumerable(&self, key: &str) -> bool {
        self.properties
            .read()
            .get(key)
            .map(|p| p.enumerable)
            .unwrap_or(false)
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow: values may point back at this object.
        f.debug_struct("JsObject")
            .field("keys", &self.keys())
            .field("has_prototype", &self.prototype.is_some())
            .finish()
    }
}

/// A host function exposed to scripts by explicit registration.
#[derive(Clone)]
pub struct NativeFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl AsRef<str>, func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ScriptError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, ScriptError> {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &NativeFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {}]", self.name)
    }
}
