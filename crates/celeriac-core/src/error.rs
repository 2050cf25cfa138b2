use std::fmt;

use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::TaskId;
use crate::domain::outcome::ExceptionInfo;

pub type Result<T, E = CeleriacError> = std::result::Result<T, E>;

/// Operational classification of an error.
///
/// - Configuration: the setup is wrong; retrying cannot help.
/// - Transient: connection or channel I/O; the next operation retries.
/// - Permanent: the task or payload itself is bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum CeleriacError {
    #[error("unsupported transport scheme '{scheme}', supported: {}", supported.join(", "))]
    Configuration {
        scheme: String,
        supported: Vec<String>,
    },

    #[error("invalid transport uri '{0}'")]
    InvalidUri(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    RemoteTask(#[from] RemoteTaskError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("result for task {0} expired before it was delivered")]
    ResultExpired(TaskId),

    #[error("client is closed")]
    Closed,
}

impl CeleriacError {
    pub fn transport(e: impl fmt::Display) -> Self {
        Self::Transport(e.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. }
            | Self::InvalidUri(_)
            | Self::Config(_)
            | Self::Registry(_) => ErrorKind::Configuration,
            Self::Transport(_) => ErrorKind::Transient,
            Self::Serialization(_)
            | Self::Dispatch(_)
            | Self::RemoteTask(_)
            | Self::ProtocolViolation(_)
            | Self::ResultExpired(_)
            | Self::Closed => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// Duplicate registrations of task handlers, methods or transport schemes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task handler '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("handler '{handler}' already has a method named '{method}'")]
    DuplicateMethod { handler: String, method: String },

    #[error("transport scheme '{0}' is already registered")]
    SchemeAlreadyRegistered(String),
}

/// The worker could not route a task to a method.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("task name must have the form handler#method, got '{0}'")]
    MalformedTaskName(String),

    #[error("task handler '{0}' is not registered")]
    UnregisteredHandler(String),

    #[error("handler '{handler}' has no method '{method}'")]
    UnknownMethod { handler: String, method: String },

    #[error("handler '{handler}' exposes {candidates} methods named '{method}'")]
    AmbiguousMethod {
        handler: String,
        method: String,
        candidates: usize,
    },

    #[error("arguments for '{task}' do not match the method signature: {reason}")]
    InvalidArguments { task: String, reason: String },
}

/// A task failed on the worker; carries the remote exception type and message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote task failed with {exc_type}: {exc_message}")]
pub struct RemoteTaskError {
    pub exc_type: String,
    pub exc_message: String,
}

impl From<ExceptionInfo> for RemoteTaskError {
    fn from(info: ExceptionInfo) -> Self {
        Self {
            exc_type: info.exc_type.unwrap_or_else(|| "UnknownError".to_string()),
            exc_message: info.exc_message.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_lists_supported_schemes() {
        let err = CeleriacError::Configuration {
            scheme: "foo".to_string(),
            supported: vec!["amqp".to_string(), "memory".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'foo'"));
        assert!(msg.contains("amqp, memory"));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(CeleriacError::transport("connection refused").is_retryable());
        assert!(!CeleriacError::Closed.is_retryable());
        assert!(
            !CeleriacError::from(DispatchError::UnregisteredHandler("calc".into())).is_retryable()
        );
    }

    #[test]
    fn remote_error_from_exception_info_fills_missing_fields() {
        let err = RemoteTaskError::from(ExceptionInfo {
            exc_type: None,
            exc_message: None,
        });
        assert_eq!(err.exc_type, "UnknownError");
        assert_eq!(err.exc_message, "");
    }
}
