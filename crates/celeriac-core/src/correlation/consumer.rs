use std::sync::Arc;

use super::pending::PendingResults;
use crate::domain::{TaskResult, TaskStatus};
use crate::error::{CeleriacError, RemoteTaskError};
use crate::ports::{Delivery, DeliveryStream};

/// How a result delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Terminal result accepted.
    Acked,
    /// Rejected without requeue: malformed, non-terminal or duplicate.
    Rejected,
}

/// Feeds result messages from a client's reply queue into its pending results.
#[derive(Clone)]
pub struct ResultConsumer {
    pending: Arc<PendingResults>,
}

impl ResultConsumer {
    pub fn new(pending: Arc<PendingResults>) -> Self {
        Self { pending }
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Settlement {
        let tag = delivery.delivery_tag;
        let accept = match decode(&delivery.message.body).and_then(|result| self.resolve(result)) {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(delivery_tag = tag, error = %e, "result delivery rejected");
                false
            }
        };

        let settled = if accept {
            delivery.ack().await
        } else {
            delivery.nack(false).await
        };
        if let Err(e) = settled {
            tracing::warn!(delivery_tag = tag, error = %e, "failed to settle result delivery");
        }
        if accept {
            Settlement::Acked
        } else {
            Settlement::Rejected
        }
    }

    /// `Ok(false)` for non-terminal states; duplicates are protocol violations.
    fn resolve(&self, result: TaskResult) -> Result<bool, CeleriacError> {
        if !result.status.is_terminal() {
            tracing::debug!(task_id = %result.task_id, status = ?result.status, "ignoring non-terminal status");
            return Ok(false);
        }
        let resolution = match result.status {
            TaskStatus::Success => Ok(result.result.clone()),
            _ => Err(RemoteTaskError::from(result.exception())),
        };
        self.pending
            .resolve(&result.task_id, resolution)
            .map_err(|e| CeleriacError::ProtocolViolation(e.to_string()))?;
        tracing::debug!(task_id = %result.task_id, status = ?result.status, "result resolved");
        Ok(true)
    }

    /// Settles deliveries until the stream ends.
    pub async fn run(&self, mut stream: Box<dyn DeliveryStream>) {
        while let Some(next) = stream.next_delivery().await {
            match next {
                Ok(delivery) => {
                    self.handle_delivery(delivery).await;
                }
                Err(e) => tracing::warn!(error = %e, "reply consumer error"),
            }
        }
        tracing::debug!("reply subscription ended");
    }
}

fn decode(body: &[u8]) -> Result<TaskResult, CeleriacError> {
    serde_json::from_slice(body)
        .map_err(|e| CeleriacError::ProtocolViolation(format!("malformed result message: {e}")))
}
