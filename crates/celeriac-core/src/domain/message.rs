//! Task message as it travels through a broker.

use serde::{Deserialize, Serialize};

use super::TaskId;

pub const CONTENT_TYPE: &str = "application/json";
pub const CONTENT_ENCODING: &str = "utf-8";

/// Routing headers of a task message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    pub id: Option<TaskId>,
    pub task: Option<String>,
    pub argsrepr: Option<String>,
    pub origin: Option<String>,
}

/// A message built by `Broker::new_message` and filled in by the client.
///
/// `reply_to` and `correlation_id` are delivery properties rather than
/// headers; `reply_to` is absent for fire-and-forget submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub content_type: String,
    pub content_encoding: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
}

impl Message {
    pub fn new() -> Self {
        Self {
            content_type: CONTENT_TYPE.to_string(),
            content_encoding: CONTENT_ENCODING.to_string(),
            ..Self::default()
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        self.headers.id.as_ref()
    }

    pub fn task_name(&self) -> Option<&str> {
        self.headers.task.as_deref()
    }
}
