//! Client - submits tasks and hands back result futures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::builder::ClientBuilder;
use crate::config::ClientConfig;
use crate::correlation::AsyncResult;
use crate::domain::{ClientIdentity, Message, TaskId, TaskPayload, TransportUri};
use crate::error::{CeleriacError, Result};
use crate::ports::{Broker, IdGenerator, ResultsProvider, TransportRegistry, TransportSettings};
use crate::resource::{ConnectorState, LazyConnector};

pub struct Client {
    pub(super) identity: ClientIdentity,
    pub(super) broker_uri: TransportUri,
    pub(super) backend_uri: Option<TransportUri>,
    pub(super) queue: String,
    pub(super) settings: TransportSettings,
    pub(super) transports: TransportRegistry,
    pub(super) ids: Arc<dyn IdGenerator>,
    pub(super) broker: LazyConnector<Arc<dyn Broker>>,
    pub(super) results: LazyConnector<Arc<dyn ResultsProvider>>,
    pub(super) closed: AtomicBool,
    /// Held shared by submissions, exclusively by `close`.
    pub(super) gate: RwLock<()>,
}

impl Client {
    pub fn builder(transports: TransportRegistry) -> ClientBuilder {
        ClientBuilder::new(transports)
    }

    pub fn from_config(config: &ClientConfig, transports: TransportRegistry) -> Result<Self> {
        ClientBuilder::from_config(config, transports).build()
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn has_backend(&self) -> bool {
        self.backend_uri.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Submits `task_name` with positional `args`.
    ///
    /// Without a backend the returned result is already resolved and holds no
    /// value.
    pub async fn submit(&self, task_name: &str, args: Vec<Value>) -> Result<AsyncResult> {
        let _submitting = self.gate.read().await;
        if self.is_closed() {
            return Err(CeleriacError::Closed);
        }
        let broker = self.broker().await?;
        let results = match &self.backend_uri {
            Some(uri) => Some(self.results_provider(uri).await?),
            None => None,
        };

        let task_id = self.ids.generate_task_id();
        // interest is registered before sending so a fast reply is never missed
        let result = match &results {
            Some(provider) => provider.get_result(&task_id),
            None => AsyncResult::empty(task_id.clone()),
        };

        let message = self.build_message(broker.as_ref(), &task_id, task_name, args, results.is_some())?;
        broker.send(&message, &self.queue).await?;
        tracing::debug!(task_id = %task_id, task = task_name, queue = %self.queue, "task submitted");
        Ok(result)
    }

    /// Submits a value that serializes to a JSON array, such as a tuple.
    pub async fn submit_with<A: Serialize + ?Sized>(
        &self,
        task_name: &str,
        args: &A,
    ) -> Result<AsyncResult> {
        match serde_json::to_value(args)? {
            Value::Array(args) => self.submit(task_name, args).await,
            _ => Err(CeleriacError::Serialization(serde::ser::Error::custom(
                "task arguments must serialize to a JSON array",
            ))),
        }
    }

    /// Releases the broker and backend. Idempotent; never connects.
    ///
    /// Waits for in-flight submissions, including one that is still
    /// connecting, so nothing is sent after `close` returns.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _closing = self.gate.write().await;
        let broker = match self.broker.state() {
            ConnectorState::Connected(broker) => broker.close().await,
            ConnectorState::Unconnected => Ok(()),
        };
        let backend = match self.results.state() {
            ConnectorState::Connected(results) => results.backend().close().await,
            ConnectorState::Unconnected => Ok(()),
        };
        tracing::debug!(client = %self.identity.client_name(), "client closed");
        broker.and(backend)
    }

    fn build_message(
        &self,
        broker: &dyn Broker,
        task_id: &TaskId,
        task_name: &str,
        args: Vec<Value>,
        expects_reply: bool,
    ) -> Result<Message> {
        let payload = TaskPayload::new(args);
        let mut message = broker.new_message();
        message.body = payload.to_bytes()?;
        message.headers.id = Some(task_id.clone());
        message.headers.task = Some(task_name.to_string());
        message.headers.argsrepr = Some(payload.args_repr());
        message.headers.origin = Some(self.identity.client_name().to_string());
        message.correlation_id = Some(task_id.to_string());
        if expects_reply {
            message.reply_to = Some(self.identity.client_id().to_string());
        }
        Ok(message)
    }

    async fn broker(&self) -> Result<Arc<dyn Broker>> {
        self.broker
            .get_or_connect(|| async {
                let broker = self
                    .transports
                    .broker_for(&self.broker_uri, &self.settings)
                    .await?;
                if let Err(e) = broker.declare_queue(&self.queue).await {
                    let _ = broker.close().await;
                    return Err(e);
                }
                Ok(broker)
            })
            .await
    }

    async fn results_provider(&self, uri: &TransportUri) -> Result<Arc<dyn ResultsProvider>> {
        self.results
            .get_or_connect(|| async {
                let backend = self.transports.backend_for(uri, &self.settings).await?;
                match backend.results_provider_for(self.identity.client_id()).await {
                    Ok(provider) => Ok(provider),
                    Err(e) => {
                        let _ = backend.close().await;
                        Err(e)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_QUEUE;
    use crate::impls::memory::{MemoryBrokerFactory, MemoryHub};
    use crate::ports::{BrokerFactory, DeliveryStream};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Wraps a broker so closes can be counted.
    struct Tracked {
        inner: Arc<dyn Broker>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Broker for Tracked {
        async fn declare_queue(&self, name: &str) -> Result<()> {
            self.inner.declare_queue(name).await
        }
        async fn send(&self, message: &Message, queue: &str) -> Result<()> {
            self.inner.send(message, queue).await
        }
        async fn consume(
            &self,
            queue: &str,
            prefetch: u16,
        ) -> Result<Box<dyn DeliveryStream>> {
            self.inner.consume(queue, prefetch).await
        }
        async fn close(&self) -> Result<()> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.inner.close().await
        }
    }

    /// Connects slowly, giving `close` a window to run mid-connect.
    struct SlowFactory {
        inner: MemoryBrokerFactory,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BrokerFactory for SlowFactory {
        fn schemes(&self) -> &[&'static str] {
            self.inner.schemes()
        }

        async fn create_broker(
            &self,
            uri: &TransportUri,
            settings: &TransportSettings,
        ) -> Result<Arc<dyn Broker>> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let inner = self.inner.create_broker(uri, settings).await?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Tracked {
                inner,
                closed: self.closed.clone(),
            }))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_during_first_connect_releases_the_broker() {
        let hub = MemoryHub::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let closed = Arc::new(AtomicUsize::new(0));
        let mut transports = TransportRegistry::new();
        transports
            .register_broker(Arc::new(SlowFactory {
                inner: MemoryBrokerFactory::new(hub.clone()),
                opened: opened.clone(),
                closed: closed.clone(),
            }))
            .unwrap();
        let client = Arc::new(
            Client::builder(transports)
                .broker("memory://")
                .build()
                .unwrap(),
        );

        let submitting = tokio::spawn({
            let client = client.clone();
            async move { client.submit("calc#sum", vec![json!(1), json!(2)]).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await.unwrap();

        // close waited for the in-flight submission and then released its broker
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            client.submit("calc#sum", vec![json!(3), json!(4)]).await,
            Err(CeleriacError::Closed)
        ));
        assert!(submitting.await.unwrap().is_ok());
        assert_eq!(hub.peek(DEFAULT_QUEUE).len(), 1);
    }
}
