//! Routing of `<handlerId>#<methodName>` task names to typed methods.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::{ExceptionInfo, TaskName};
use crate::error::DispatchError;
use crate::typed::{InvokeError, TaskError, TaskLookup, TaskMethod};

/// Exception type reported for tasks that could not be routed.
pub const DISPATCH_EXCEPTION: &str = "DispatchException";

/// A task that ran (or was routed) but produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskFailure {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl TaskFailure {
    pub fn exception_info(&self) -> ExceptionInfo {
        match self {
            Self::Dispatch(e) => ExceptionInfo::new(DISPATCH_EXCEPTION, e.to_string()),
            Self::Task(e) => ExceptionInfo::from(e),
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    tasks: Arc<dyn TaskLookup>,
}

impl Dispatcher {
    pub fn new(tasks: Arc<dyn TaskLookup>) -> Self {
        Self { tasks }
    }

    /// Finds the single method a task name refers to.
    pub fn resolve(&self, raw: &str) -> Result<(TaskName, Arc<dyn TaskMethod>), DispatchError> {
        let name = TaskName::parse(raw)?;
        let handler = self
            .tasks
            .get_task(name.handler())
            .ok_or_else(|| DispatchError::UnregisteredHandler(name.handler().to_string()))?;

        let mut candidates = handler.methods_named(name.method());
        match candidates.len() {
            0 => Err(DispatchError::UnknownMethod {
                handler: name.handler().to_string(),
                method: name.method().to_string(),
            }),
            1 => {
                let method = candidates.remove(0);
                Ok((name, method))
            }
            n => Err(DispatchError::AmbiguousMethod {
                handler: name.handler().to_string(),
                method: name.method().to_string(),
                candidates: n,
            }),
        }
    }
}

/// Invokes `method`, mapping argument mismatches to dispatch errors.
pub async fn invoke(
    name: &TaskName,
    method: &dyn TaskMethod,
    args: Vec<Value>,
) -> Result<Value, TaskFailure> {
    method.invoke(args).await.map_err(|e| match e {
        InvokeError::InvalidArguments(reason) => TaskFailure::Dispatch(DispatchError::InvalidArguments {
            task: name.to_string(),
            reason,
        }),
        InvokeError::Failed(task) => TaskFailure::Task(task),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::typed::{MethodTable, TaskHandler, TaskRegistry};
    use async_trait::async_trait;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Two methods with the same name, like overloads.
    struct Overloaded {
        calls: Arc<AtomicUsize>,
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl TaskMethod for Counting {
        fn name(&self) -> &str {
            "run"
        }
        fn arity(&self) -> usize {
            0
        }
        async fn invoke(&self, _args: Vec<Value>) -> Result<Value, InvokeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }
    }

    impl TaskHandler for Overloaded {
        fn id(&self) -> &str {
            "overloaded"
        }
        fn methods_named(&self, name: &str) -> Vec<Arc<dyn TaskMethod>> {
            if name != "run" {
                return Vec::new();
            }
            vec![
                Arc::new(Counting(self.calls.clone())),
                Arc::new(Counting(self.calls.clone())),
            ]
        }
    }

    fn dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
        let calc = MethodTable::new("calc")
            .method("sum", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .unwrap()
            .method("fail", |(msg,): (String,)| async move {
                Err::<Value, _>(TaskError::runtime(msg))
            })
            .unwrap();
        let registry = TaskRegistry::new()
            .with(calc)
            .unwrap()
            .with(Overloaded { calls })
            .unwrap();
        Dispatcher::new(Arc::new(registry))
    }

    async fn run(d: &Dispatcher, raw: &str, args: Vec<Value>) -> Result<Value, TaskFailure> {
        let (name, method) = d.resolve(raw)?;
        invoke(&name, method.as_ref(), args).await
    }

    #[tokio::test]
    async fn dispatches_to_the_named_method() {
        let d = dispatcher(Arc::default());
        assert_eq!(run(&d, "calc#sum", vec![json!(2), json!(3)]).await, Ok(json!(5)));
    }

    #[rstest]
    #[case::malformed("calc", DispatchError::MalformedTaskName("calc".into()))]
    #[case::unregistered("nope#sum", DispatchError::UnregisteredHandler("nope".into()))]
    #[case::unknown_method(
        "calc#mul",
        DispatchError::UnknownMethod { handler: "calc".into(), method: "mul".into() }
    )]
    #[case::ambiguous(
        "overloaded#run",
        DispatchError::AmbiguousMethod { handler: "overloaded".into(), method: "run".into(), candidates: 2 }
    )]
    #[tokio::test]
    async fn routing_errors(#[case] name: &str, #[case] expected: DispatchError) {
        let calls = Arc::new(AtomicUsize::new(0));
        let d = dispatcher(calls.clone());
        assert_eq!(
            run(&d, name, Vec::new()).await,
            Err(TaskFailure::Dispatch(expected))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn argument_mismatch_is_a_dispatch_error() {
        let d = dispatcher(Arc::default());
        let err = run(&d, "calc#sum", vec![json!("x")]).await.unwrap_err();
        let TaskFailure::Dispatch(DispatchError::InvalidArguments { task, .. }) = &err else {
            panic!("unexpected: {err:?}");
        };
        assert_eq!(task, "calc#sum");
        assert_eq!(err.exception_info().exc_type.as_deref(), Some(DISPATCH_EXCEPTION));
    }

    #[tokio::test]
    async fn task_errors_keep_their_type() {
        let d = dispatcher(Arc::default());
        let err = run(&d, "calc#fail", vec![json!("boom")]).await.unwrap_err();
        assert_eq!(
            err.exception_info(),
            ExceptionInfo::new("RuntimeException", "boom")
        );
    }
}
