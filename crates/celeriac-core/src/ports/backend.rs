//! Backend port: carries results from workers back to clients.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::broker::TransportSettings;
use crate::correlation::AsyncResult;
use crate::domain::{ClientId, ExceptionInfo, TaskId, TransportUri};
use crate::error::Result;

#[async_trait]
pub trait Backend: Send + Sync {
    /// The provider for `client_id`; its reply queue is declared and consumed
    /// the first time a given client asks.
    async fn results_provider_for(&self, client_id: &ClientId) -> Result<Arc<dyn ResultsProvider>>;

    /// Sends a SUCCESS result to `reply_to`.
    async fn report_result(
        &self,
        task_id: &TaskId,
        reply_to: &str,
        correlation_id: &str,
        result: Value,
    ) -> Result<()>;

    /// Sends a FAILURE result to `reply_to`.
    async fn report_exception(
        &self,
        task_id: &TaskId,
        reply_to: &str,
        correlation_id: &str,
        exception: &ExceptionInfo,
    ) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Result futures of a single client.
pub trait ResultsProvider: Send + Sync {
    /// Same underlying future for repeated calls with the same id.
    fn get_result(&self, task_id: &TaskId) -> AsyncResult;

    fn backend(&self) -> Arc<dyn Backend>;
}

#[async_trait]
pub trait BackendFactory: Send + Sync {
    fn schemes(&self) -> &[&'static str];

    async fn create_backend(
        &self,
        uri: &TransportUri,
        settings: &TransportSettings,
    ) -> Result<Arc<dyn Backend>>;
}
