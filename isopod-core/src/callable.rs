//! Callables as opaque behavior references.
//!
//! A function value keeps its source text alongside an optional native
//! behavior. Only the source text crosses the wire; rebuilding the behavior
//! on the receiving side is delegated to an injected [`Compiler`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::value::Value;

/// Native behavior bound to a callable.
pub type NativeFn = Rc<dyn Fn(&[Value]) -> Result<Value, CallError>>;

/// Error raised by invoking a callable.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("callable was rebuilt without a compiler: {0}")]
    NotCompiled(String),
    #[error("{0} is not callable")]
    NotCallable(String),
    #[error("call failed: {0}")]
    Failed(String),
}

/// Error raised by a [`Compiler`] that cannot rebuild a callable.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("no behavior registered for source `{0}`")]
    UnknownSource(String),
    #[error("compilation rejected: {0}")]
    Rejected(String),
}

/// Source text plus the behavior it denotes.
#[derive(Clone)]
pub struct Callable {
    source: String,
    behavior: Option<NativeFn>,
}

impl Callable {
    pub fn new(source: impl Into<String>, behavior: NativeFn) -> Self {
        Callable {
            source: source.into(),
            behavior: Some(behavior),
        }
    }

    /// A callable that remembers its source but cannot run.
    pub fn inert(source: impl Into<String>) -> Self {
        Callable {
            source: source.into(),
            behavior: None,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_compiled(&self) -> bool {
        self.behavior.is_some()
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, CallError> {
        match &self.behavior {
            Some(behavior) => behavior(args),
            None => Err(CallError::NotCompiled(self.source.clone())),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("source", &self.source)
            .field("compiled", &self.is_compiled())
            .finish()
    }
}

/// Turns callable source text back into behavior.
pub trait Compiler {
    fn compile(&self, source: &str) -> Result<NativeFn, CompileError>;
}

/// A compiler that only knows a fixed table of source texts.
///
/// Both sides of a transport register the same sources; the receiving side
/// then rebinds each incoming callable to its local native behavior.
/// Sources are matched after trimming surrounding whitespace.
#[derive(Default)]
pub struct RegistryCompiler {
    entries: HashMap<String, NativeFn>,
}

impl RegistryCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: &str, behavior: NativeFn) -> &mut Self {
        self.entries.insert(source.trim().to_string(), behavior);
        self
    }

    /// Builds a callable for a registered source, for use on the sending side.
    pub fn callable(&self, source: &str) -> Result<Callable, CompileError> {
        self.compile(source).map(|behavior| Callable::new(source, behavior))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Compiler for RegistryCompiler {
    fn compile(&self, source: &str) -> Result<NativeFn, CompileError> {
        self.entries
            .get(source.trim())
            .cloned()
            .ok_or_else(|| CompileError::UnknownSource(source.to_string()))
    }
}
