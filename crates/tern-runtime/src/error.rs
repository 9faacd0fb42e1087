//! Error types for tern-runtime

use std::sync::Arc;

use tern_repository::RepositoryError;
use thiserror::Error;

use crate::syntax_error::{SyntaxError, format_errors};
use crate::value::Value;

/// Failure to compile a source into an executable unit.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub errors: Vec<SyntaxError>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Build from collected syntax errors; the message renders all of them.
    pub fn from_syntax_errors(errors: Vec<SyntaxError>) -> Self {
        Self {
            message: format_errors(&errors),
            errors,
        }
    }
}

impl From<SyntaxError> for CompileError {
    fn from(error: SyntaxError) -> Self {
        Self::from_syntax_errors(vec![error])
    }
}

/// Error raised while a module body or exported function runs.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    /// A value thrown by script code
    #[error("{name}: {message}")]
    Thrown {
        name: String,
        message: String,
        value: Option<Value>,
    },

    /// Sentinel asking the invocation layer to start over once
    #[error("Retry requested")]
    RetryRequested,

    /// A nested module load failed; carried through the engine unchanged
    #[error(transparent)]
    Load(Arc<RuntimeError>),
}

impl ScriptError {
    /// Create a thrown `Error` with the given message
    pub fn error(message: impl Into<String>) -> Self {
        Self::thrown("Error", message)
    }

    /// Create a thrown error of a named kind (`TypeError`, ...)
    pub fn thrown(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Thrown {
            name: name.into(),
            message: message.into(),
            value: None,
        }
    }

    /// Create an error carrying the thrown script value
    pub fn with_value(message: impl Into<String>, value: Value) -> Self {
        Self::Thrown {
            name: "Error".to_string(),
            message: message.into(),
            value: Some(value),
        }
    }
}

impl From<RuntimeError> for ScriptError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::Evaluation(inner) => inner,
            other => ScriptError::Load(Arc::new(other)),
        }
    }
}

/// Runtime error type
#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// Module or resource does not exist
    #[error("Module not found: {name}")]
    NotFound { name: String },

    /// Source was read but failed to compile
    #[error("Compile error in '{path}': {source}")]
    Compile {
        path: String,
        #[source]
        source: Arc<CompileError>,
    },

    /// Source could not be read
    #[error("IO error: {0}")]
    Io(RepositoryError),

    /// Error raised by the module body or an invoked function
    #[error("Evaluation error: {0}")]
    Evaluation(ScriptError),

    /// Invocation target is missing or not callable
    #[error("'{function}' is not a function in module {module}")]
    NotAFunction { module: String, function: String },

    /// Invalid runtime configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RuntimeError {
    /// Create a not-found error
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Create a compile error for the resource at `path`
    pub fn compile(path: impl Into<String>, error: CompileError) -> Self {
        Self::Compile {
            path: path.into(),
            source: Arc::new(error),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Syntax errors carried by a compile error, empty otherwise.
    pub fn syntax_errors(&self) -> &[SyntaxError] {
        match self {
            Self::Compile { source, .. } => &source.errors,
            _ => &[],
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_retry_requested(&self) -> bool {
        matches!(self, Self::Evaluation(ScriptError::RetryRequested))
    }
}

impl From<RepositoryError> for RuntimeError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { path } => Self::NotFound { name: path },
            other => Self::Io(other),
        }
    }
}

impl From<ScriptError> for RuntimeError {
    fn from(error: ScriptError) -> Self {
        match error {
            ScriptError::Load(inner) => Arc::unwrap_or_clone(inner),
            other => Self::Evaluation(other),
        }
    }
}

/// Result type using RuntimeError
pub type RuntimeResult<T> = Result<T, RuntimeError>;
