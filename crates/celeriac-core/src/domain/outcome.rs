//! Result messages sent from the worker back to the submitting client.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TaskId;

/// Celery task states; serialized as SUCCESS / FAILURE / ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
    Started,
    Pending,
    Retry,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failure)
    }
}

/// The `result` field of a FAILURE message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    #[serde(default)]
    pub exc_type: Option<String>,
    #[serde(default)]
    pub exc_message: Option<String>,
}

impl ExceptionInfo {
    pub fn new(exc_type: impl Into<String>, exc_message: impl Into<String>) -> Self {
        Self {
            exc_type: Some(exc_type.into()),
            exc_message: Some(exc_message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub children: Value,
    #[serde(default)]
    pub traceback: Option<String>,
    /// Kept as text: Python workers may send naive timestamps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_done: Option<String>,
}

impl TaskResult {
    pub fn success(task_id: TaskId, result: Value) -> Self {
        Self {
            task_id,
            status: TaskStatus::Success,
            result,
            children: Value::Array(Vec::new()),
            traceback: None,
            date_done: None,
        }
    }

    pub fn failure(task_id: TaskId, exception: &ExceptionInfo) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failure,
            result: serde_json::to_value(exception).unwrap_or(Value::Null),
            children: Value::Array(Vec::new()),
            traceback: None,
            date_done: None,
        }
    }

    pub fn done_at(mut self, at: DateTime<Utc>) -> Self {
        self.date_done = Some(at.to_rfc3339_opts(SecondsFormat::Micros, true));
        self
    }

    /// The exception details of a FAILURE; missing fields stay `None`.
    ///
    /// Python workers send `exc_message` as the exception args list.
    pub fn exception(&self) -> ExceptionInfo {
        let exc_type = self.result.get("exc_type").and_then(Value::as_str);
        let exc_message = match self.result.get("exc_message") {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Array(args)) => Some(
                args.iter()
                    .map(|arg| match arg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            _ => None,
        };
        ExceptionInfo {
            exc_type: exc_type.map(str::to_string),
            exc_message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn success_serializes_with_celery_field_names() {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let result = TaskResult::success(TaskId::new("t-1"), json!(5)).done_at(at);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["status"], "SUCCESS");
        assert_eq!(value["result"], 5);
        assert_eq!(value["children"], json!([]));
        assert_eq!(value["traceback"], Value::Null);
        assert_eq!(value["date_done"], "2024-01-01T12:00:00.000000Z");
    }

    #[test]
    fn failure_carries_exception_fields() {
        let result = TaskResult::failure(
            TaskId::new("t-2"),
            &ExceptionInfo::new("RuntimeException", "boom"),
        );
        assert_eq!(
            result.result,
            json!({"exc_type": "RuntimeException", "exc_message": "boom"})
        );
        assert_eq!(
            result.exception(),
            ExceptionInfo::new("RuntimeException", "boom")
        );
    }

    #[test]
    fn parses_python_celery_result_with_extra_fields() {
        let raw = json!({
            "task_id": "abc",
            "status": "RETRY",
            "result": null,
            "traceback": null,
            "children": [],
            "date_done": null,
            "name": "ignored"
        });
        let result: TaskResult = serde_json::from_value(raw).unwrap();
        assert_eq!(result.status, TaskStatus::Retry);
        assert!(!result.status.is_terminal());
    }

    #[test]
    fn exception_of_non_object_result_is_empty() {
        let result = TaskResult {
            status: TaskStatus::Failure,
            ..TaskResult::success(TaskId::new("t-3"), json!("oops"))
        };
        assert_eq!(result.exception().exc_type, None);
    }

    #[test]
    fn exception_message_from_python_args_list() {
        let result = TaskResult {
            status: TaskStatus::Failure,
            ..TaskResult::success(
                TaskId::new("t-4"),
                json!({"exc_type": "ValueError", "exc_message": ["bad", 3]}),
            )
        };
        assert_eq!(result.exception(), ExceptionInfo::new("ValueError", "bad, 3"));
    }
}
