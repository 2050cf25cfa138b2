//! Task handlers and their methods.
//!
//! # 二層構造
//! - **表層（Typed）**: `MethodTable::method` に `Fn(A) -> Future<Output = Result<R, TaskError>>`
//!   を登録。A は `FromArgs`、R は `Serialize`
//! - **内部（Dyn）**: `TaskMethod` trait - object-safe, type erasure
//!   (`TypedMethod<A, R, F>` → `dyn TaskMethod`)

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::codec::FromArgs;
use crate::domain::ExceptionInfo;
use crate::error::RegistryError;

/// Failure raised by a task method; sent back as the FAILURE result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{exc_type}: {message}")]
pub struct TaskError {
    pub exc_type: String,
    pub message: String,
}

impl TaskError {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_type: exc_type.into(),
            message: message.into(),
        }
    }

    /// A generic runtime failure (`RuntimeException` on the wire).
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new("RuntimeException", message)
    }
}

impl From<&TaskError> for ExceptionInfo {
    fn from(err: &TaskError) -> Self {
        ExceptionInfo::new(err.exc_type.clone(), err.message.clone())
    }
}

/// Why a method invocation produced no value.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    /// The arguments did not fit the parameter list; the body never ran.
    #[error("{0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Failed(#[from] TaskError),
}

/// Object-safe view of one task method.
#[async_trait]
pub trait TaskMethod: Send + Sync {
    fn name(&self) -> &str;

    /// Number of positional parameters.
    fn arity(&self) -> usize;

    async fn invoke(&self, args: Vec<Value>) -> Result<Value, InvokeError>;
}

/// A named bundle of task methods, addressed as `<id>#<method>`.
pub trait TaskHandler: Send + Sync {
    fn id(&self) -> &str;

    /// All methods called `name`. More than one is ambiguous and is refused
    /// by the dispatcher.
    fn methods_named(&self, name: &str) -> Vec<Arc<dyn TaskMethod>>;
}

struct TypedMethod<A, R, F> {
    name: String,
    func: F,
    _marker: PhantomData<fn(A) -> R>,
}

#[async_trait]
impl<A, R, F, Fut> TaskMethod for TypedMethod<A, R, F>
where
    A: FromArgs,
    R: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> usize {
        A::ARITY
    }

    async fn invoke(&self, args: Vec<Value>) -> Result<Value, InvokeError> {
        let args = A::from_args(args).map_err(|e| InvokeError::InvalidArguments(e.to_string()))?;
        let value = (self.func)(args).await?;
        serde_json::to_value(value)
            .map_err(|e| TaskError::new("SerializationError", e.to_string()).into())
    }
}

/// Closure-based handler.
///
/// ```ignore
/// let calc = MethodTable::new("calc")
///     .method("sum", |(a, b): (i64, i64)| async move { Ok(a + b) })?;
/// ```
pub struct MethodTable {
    id: String,
    methods: Vec<Arc<dyn TaskMethod>>,
}

impl MethodTable {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            methods: Vec::new(),
        }
    }

    /// Registers a method. Method names are unique within one table.
    pub fn method<A, R, F, Fut>(mut self, name: &str, func: F) -> Result<Self, RegistryError>
    where
        A: FromArgs,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        if self.methods.iter().any(|m| m.name() == name) {
            return Err(RegistryError::DuplicateMethod {
                handler: self.id.clone(),
                method: name.to_string(),
            });
        }
        self.methods.push(Arc::new(TypedMethod {
            name: name.to_string(),
            func,
            _marker: PhantomData::<fn(A) -> R>,
        }));
        Ok(self)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(|m| m.name()).collect()
    }
}

impl TaskHandler for MethodTable {
    fn id(&self) -> &str {
        &self.id
    }

    fn methods_named(&self, name: &str) -> Vec<Arc<dyn TaskMethod>> {
        self.methods
            .iter()
            .filter(|m| m.name() == name)
            .cloned()
            .collect()
    }
}
