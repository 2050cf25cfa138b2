use std::sync::Arc;

use super::worker::Worker;
use crate::config::WorkerConfig;
use crate::domain::TransportUri;
use crate::error::Result;
use crate::observability::WorkerCounts;
use crate::ports::{Backend, Broker, TransportRegistry, TransportSettings};
use crate::typed::TaskLookup;

/// Worker group handle.
/// - broker/backend は全ワーカーで共有（接続は 1 つ、channel は consumer ごと）
/// - `shutdown_and_join()` で全ワーカーを drain してから transport を閉じる
pub struct WorkerGroup {
    workers: Vec<Worker>,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
}

impl WorkerGroup {
    /// Connects the configured transports, declares the queue and spawns
    /// `concurrency` workers.
    pub async fn start(
        config: &WorkerConfig,
        transports: &TransportRegistry,
        tasks: Arc<dyn TaskLookup>,
    ) -> Result<Self> {
        let settings = TransportSettings::default();
        let broker_uri = TransportUri::parse(&config.broker_uri)?;
        let backend_uri = TransportUri::parse(&config.backend_uri)?;
        // fail fast on unknown schemes before connecting anything
        transports.broker_factory(&broker_uri)?;
        transports.backend_factory(&backend_uri)?;

        let broker = transports.broker_for(&broker_uri, &settings).await?;
        let backend = match transports.backend_for(&backend_uri, &settings).await {
            Ok(backend) => backend,
            Err(e) => {
                let _ = broker.close().await;
                return Err(e);
            }
        };
        Self::spawn(
            broker,
            backend,
            tasks,
            &config.queue,
            config.effective_concurrency(),
            config.prefetch,
        )
        .await
    }

    /// Spawns `n` workers over already connected transports.
    pub async fn spawn(
        broker: Arc<dyn Broker>,
        backend: Arc<dyn Backend>,
        tasks: Arc<dyn TaskLookup>,
        queue: &str,
        n: usize,
        prefetch: u16,
    ) -> Result<Self> {
        broker.declare_queue(queue).await?;

        let mut workers = Vec::with_capacity(n);
        for worker_id in 0..n {
            let started = Worker::start(
                format!("worker-{worker_id}"),
                &broker,
                backend.clone(),
                tasks.clone(),
                queue,
                prefetch,
            )
            .await;
            match started {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    let partial = Self {
                        workers,
                        broker,
                        backend,
                    };
                    let _ = partial.shutdown_and_join().await;
                    return Err(e);
                }
            }
        }
        tracing::info!(queue, workers = n, prefetch, "worker group started");

        Ok(Self {
            workers,
            broker,
            backend,
        })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn counts(&self) -> WorkerCounts {
        self.workers
            .iter()
            .map(Worker::counts)
            .fold(WorkerCounts::default(), |acc, c| acc + c)
    }

    /// Drains every worker, then closes the transports.
    pub async fn shutdown_and_join(self) -> Result<()> {
        for worker in &self.workers {
            worker.close().await;
        }
        let backend = self.backend.close().await;
        let broker = self.broker.close().await;
        tracing::info!(counts = ?self.counts(), "worker group stopped");
        backend.and(broker)
    }
}
