//! Result backend shared by the channel-based transports.
//!
//! Results are published to the submitting client's reply queue. Each client
//! id gets one provider, which consumes that queue. When the subscription
//! ends (the broker restarted or dropped the connection), the queue is
//! declared again and re-subscribed with backoff; futures still pending keep
//! waiting on the same cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::correlation::{AsyncResult, PendingResults, ResultConsumer};
use crate::domain::{ClientId, ExceptionInfo, Message, TaskId, TaskResult};
use crate::error::Result;
use crate::ports::{Backend, Clock, DeliveryStream, QueueSpec, ResultsProvider, TransportSettings};
use crate::resource::{Backoff, ChannelPool, ChannelSource, PooledChannel, reaper_period};

/// What a transport channel must offer to carry results.
#[async_trait]
pub trait ResultChannel: PooledChannel {
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<()>;

    /// Publishes a non-persistent message to `queue`.
    async fn publish_result(&self, queue: &str, message: Message) -> Result<()>;

    /// Subscribes on this channel, which the stream then owns.
    async fn subscribe(self, queue: &str, prefetch: u16) -> Result<Box<dyn DeliveryStream>>;
}

struct BackendInner<S: ChannelSource> {
    pool: Arc<ChannelPool<S>>,
    settings: TransportSettings,
    clock: Arc<dyn Clock>,
    providers: Mutex<HashMap<ClientId, Arc<ChannelResultsProvider<S>>>>,
    reaper: JoinHandle<()>,
}

impl<S> BackendInner<S>
where
    S: ChannelSource,
    S::Channel: ResultChannel,
{
    async fn subscribe(&self, spec: &QueueSpec) -> Result<Box<dyn DeliveryStream>> {
        self.pool.get_channel().await?.declare_queue(spec).await?;
        self.pool
            .source()
            .open_channel()
            .await?
            .subscribe(&spec.name, self.settings.reply_prefetch)
            .await
    }
}

pub struct ChannelBackend<S: ChannelSource> {
    inner: Arc<BackendInner<S>>,
}

impl<S: ChannelSource> Clone for ChannelBackend<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> ChannelBackend<S>
where
    S: ChannelSource,
    S::Channel: ResultChannel,
{
    pub fn new(source: Arc<S>, settings: &TransportSettings, clock: Arc<dyn Clock>) -> Self {
        let pool = Arc::new(ChannelPool::new(source, settings.channel_idle));
        let reaper = pool.spawn_reaper(reaper_period(settings.channel_idle));
        Self {
            inner: Arc::new(BackendInner {
                pool,
                settings: settings.clone(),
                clock,
                providers: Mutex::new(HashMap::new()),
                reaper,
            }),
        }
    }

    async fn publish_result(&self, reply_to: &str, correlation_id: &str, result: TaskResult) -> Result<()> {
        let result = result.done_at(self.inner.clock.now());
        let mut message = Message::new();
        message.body = serde_json::to_vec(&result)?;
        message.headers.id = Some(result.task_id.clone());
        message.correlation_id = Some(correlation_id.to_string());
        let channel = self.inner.pool.get_channel().await?;
        channel.publish_result(reply_to, message).await
    }
}

#[async_trait]
impl<S> Backend for ChannelBackend<S>
where
    S: ChannelSource,
    S::Channel: ResultChannel,
{
    async fn results_provider_for(&self, client_id: &ClientId) -> Result<Arc<dyn ResultsProvider>> {
        if let Some(existing) = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
        {
            return Ok(existing.clone());
        }

        let spec = QueueSpec::reply_queue(client_id);
        let stream = self.inner.subscribe(&spec).await?;
        let pending = Arc::new(PendingResults::new(self.inner.settings.result_ttl));
        let consumer = tokio::spawn(consume_replies(
            Arc::downgrade(&self.inner),
            spec,
            ResultConsumer::new(pending.clone()),
            stream,
        ));

        let provider = Arc::new(ChannelResultsProvider {
            pending,
            backend: self.clone(),
            consumer,
        });
        let mut providers = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let winner = providers
            .entry(client_id.clone())
            .or_insert_with(|| provider.clone())
            .clone();
        if !Arc::ptr_eq(&winner, &provider) {
            // a concurrent caller got there first
            provider.consumer.abort();
        }
        Ok(winner)
    }

    async fn report_result(
        &self,
        task_id: &TaskId,
        reply_to: &str,
        correlation_id: &str,
        result: Value,
    ) -> Result<()> {
        self.publish_result(reply_to, correlation_id, TaskResult::success(task_id.clone(), result))
            .await
    }

    async fn report_exception(
        &self,
        task_id: &TaskId,
        reply_to: &str,
        correlation_id: &str,
        exception: &ExceptionInfo,
    ) -> Result<()> {
        self.publish_result(reply_to, correlation_id, TaskResult::failure(task_id.clone(), exception))
            .await
    }

    async fn close(&self) -> Result<()> {
        let providers: Vec<_> = self
            .inner
            .providers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, provider)| provider)
            .collect();
        for provider in &providers {
            provider.consumer.abort();
        }
        drop(providers);
        self.inner.reaper.abort();
        self.inner.pool.close().await
    }
}

/// Feeds the reply queue into `consumer`, re-subscribing whenever the
/// subscription ends. Stops once the backend is gone.
async fn consume_replies<S>(
    inner: Weak<BackendInner<S>>,
    spec: QueueSpec,
    consumer: ResultConsumer,
    mut stream: Box<dyn DeliveryStream>,
) where
    S: ChannelSource,
    S::Channel: ResultChannel,
{
    loop {
        consumer.run(stream).await;
        let mut backoff = Backoff::resubscribe();
        stream = loop {
            tokio::time::sleep(backoff.next_delay()).await;
            let Some(inner) = inner.upgrade() else {
                return;
            };
            match inner.subscribe(&spec).await {
                Ok(stream) => {
                    tracing::info!(queue = %spec.name, "reply queue re-subscribed");
                    break stream;
                }
                Err(e) => {
                    tracing::warn!(queue = %spec.name, error = %e, "reply queue re-subscription failed");
                }
            }
        };
    }
}

pub struct ChannelResultsProvider<S: ChannelSource> {
    pending: Arc<PendingResults>,
    backend: ChannelBackend<S>,
    consumer: JoinHandle<()>,
}

impl<S: ChannelSource> Drop for ChannelResultsProvider<S> {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

impl<S> ResultsProvider for ChannelResultsProvider<S>
where
    S: ChannelSource,
    S::Channel: ResultChannel,
{
    fn get_result(&self, task_id: &TaskId) -> AsyncResult {
        self.pending.get_result(task_id)
    }

    fn backend(&self) -> Arc<dyn Backend> {
        Arc::new(self.backend.clone())
    }
}
