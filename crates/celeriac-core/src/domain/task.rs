use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DispatchError;

/// A task name of the form `<handlerId>#<methodName>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskName {
    handler: String,
    method: String,
}

impl TaskName {
    pub const SEPARATOR: char = '#';

    pub fn new(handler: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            method: method.into(),
        }
    }

    /// Exactly two non-empty parts are required.
    pub fn parse(raw: &str) -> Result<Self, DispatchError> {
        let mut parts = raw.split(Self::SEPARATOR);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(handler), Some(method), None) if !handler.is_empty() && !method.is_empty() => {
                Ok(Self::new(handler, method))
            }
            _ => Err(DispatchError::MalformedTaskName(raw.to_string())),
        }
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    pub fn method(&self) -> &str {
        &self.method
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.handler, Self::SEPARATOR, self.method)
    }
}

impl TryFrom<String> for TaskName {
    type Error = DispatchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TaskName> for String {
    fn from(name: TaskName) -> Self {
        name.to_string()
    }
}
