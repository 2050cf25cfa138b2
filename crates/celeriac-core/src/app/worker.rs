//! Worker - consumes one task queue and reports results.
//!
//! # フロー（delivery ごと）
//! 1. `id` header がなければ相関できないので drop（nack, requeue なし）
//! 2. body を `[args, kwargs, embed]` として decode。失敗 → 報告して nack
//! 3. task 名 → handler → method を解決。DispatchError → 報告して ack
//! 4. 実行（別 task で実行し panic を検出）
//!    - 成功 → 結果を報告して ack（報告失敗 → nack）
//!    - TaskError / 引数エラー → 報告して ack
//!    - panic → 報告して nack
//!
//! 実行は gate（`tokio::sync::Mutex`）で 1 件ずつ。受信は prefetch 件まで先行する。
//! 購読が切れた場合（broker の再起動など）は backoff を挟んで再購読する。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::dispatch::{Dispatcher, TaskFailure, invoke};
use crate::domain::{ExceptionInfo, Message, TaskId, TaskPayload};
use crate::error::Result;
use crate::observability::{WorkerCounters, WorkerCounts};
use crate::ports::{Acker, Backend, Broker, Delivery, DeliveryStream};
use crate::resource::Backoff;
use crate::typed::TaskLookup;

/// Exception types for failures that happen outside the task body.
pub const DECODE_EXCEPTION: &str = "MessageDecodeError";
pub const PANIC_EXCEPTION: &str = "TaskPanicked";

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Ack,
    Reject,
    /// Worker is stopping; leave the delivery for someone else.
    Requeue,
}

struct WorkerCore {
    name: String,
    broker: Arc<dyn Broker>,
    queue: String,
    prefetch: u16,
    backend: Arc<dyn Backend>,
    dispatcher: Dispatcher,
    gate: tokio::sync::Mutex<()>,
    shutdown: watch::Sender<bool>,
    counters: WorkerCounters,
}

pub struct Worker {
    core: Arc<WorkerCore>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Subscribes to `queue` and starts processing deliveries.
    pub async fn start(
        name: impl Into<String>,
        broker: &Arc<dyn Broker>,
        backend: Arc<dyn Backend>,
        tasks: Arc<dyn TaskLookup>,
        queue: &str,
        prefetch: u16,
    ) -> Result<Self> {
        let stream = broker.consume(queue, prefetch).await?;
        let (shutdown, _) = watch::channel(false);
        let core = Arc::new(WorkerCore {
            name: name.into(),
            broker: broker.clone(),
            queue: queue.to_string(),
            prefetch,
            backend,
            dispatcher: Dispatcher::new(tasks),
            gate: tokio::sync::Mutex::new(()),
            shutdown,
            counters: WorkerCounters::default(),
        });
        tracing::info!(worker = %core.name, queue, prefetch, "worker started");
        let consumer = tokio::spawn(consume_loop(core.clone(), stream));
        Ok(Self {
            core,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn counts(&self) -> WorkerCounts {
        self.core.counters.snapshot()
    }

    /// Stops consuming, then waits for the task in progress.
    ///
    /// Deliveries received but not yet started are requeued.
    pub async fn close(&self) {
        self.core.shutdown.send_replace(true);
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(consumer) = consumer {
            let _ = consumer.await;
        }
        drop(self.core.gate.lock().await);
        tracing::info!(worker = %self.core.name, "worker stopped");
    }
}

async fn consume_loop(core: Arc<WorkerCore>, mut stream: Box<dyn DeliveryStream>) {
    let mut shutdown = core.shutdown.subscribe();
    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        let next = tokio::select! {
            _ = shutdown.changed() => continue,
            next = stream.next_delivery() => next,
        };
        match next {
            None => {
                tracing::warn!(worker = %core.name, queue = %core.queue, "task queue subscription ended");
                drop(stream);
                match core.resubscribe(&mut shutdown).await {
                    Some(fresh) => stream = fresh,
                    None => break,
                }
            }
            Some(Err(e)) => {
                tracing::warn!(worker = %core.name, error = %e, "delivery error");
            }
            Some(Ok(delivery)) => {
                core.counters.received();
                tokio::spawn(core.clone().process(delivery));
            }
        }
    }
    // the stream, if any, is dropped here, which cancels the subscription
}

impl WorkerCore {
    /// Subscribes again with backoff. `None` once shutdown is requested.
    async fn resubscribe(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Box<dyn DeliveryStream>> {
        let mut backoff = Backoff::resubscribe();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(backoff.next_delay()) => {}
                _ = shutdown.wait_for(|stop| *stop) => return None,
            }
            match self.broker.consume(&self.queue, self.prefetch).await {
                Ok(stream) => {
                    tracing::info!(worker = %self.name, queue = %self.queue, "task queue re-subscribed");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(worker = %self.name, queue = %self.queue, error = %e, "re-subscription failed");
                }
            }
        }
    }

    async fn process(self: Arc<Self>, delivery: Delivery) {
        let _gate = self.gate.lock().await;
        let (message, delivery_tag, acker) = delivery.into_parts();
        let settle = if *self.shutdown.borrow() {
            Settle::Requeue
        } else {
            self.handle(&message, delivery_tag).await
        };
        self.settle(acker, settle, delivery_tag).await;
    }

    async fn handle(&self, message: &Message, delivery_tag: u64) -> Settle {
        let Some(task_id) = message.task_id().cloned() else {
            tracing::error!(delivery_tag, "task message without id header; dropping");
            return Settle::Reject;
        };
        let task = message.task_name().unwrap_or_default().to_string();
        let span = tracing::info_span!("task", task_id = %task_id, task = %task, delivery_tag);
        self.run(message, &task_id, &task).instrument(span).await
    }

    async fn run(&self, message: &Message, task_id: &TaskId, task: &str) -> Settle {
        let reply = Reply::from_message(task_id, message);

        let payload = match TaskPayload::from_bytes(&message.body) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "undecodable task body");
                self.report_failure(&reply, &ExceptionInfo::new(DECODE_EXCEPTION, e.to_string()))
                    .await;
                return Settle::Reject;
            }
        };

        let (name, method) = match self.dispatcher.resolve(task) {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(error = %e, "dispatch error");
                self.report_failure(&reply, &TaskFailure::from(e).exception_info())
                    .await;
                self.counters.failed();
                return Settle::Ack;
            }
        };

        let started = Instant::now();
        let args = payload.into_args();
        let joined = tokio::spawn(async move { invoke(&name, method.as_ref(), args).await }).await;

        match joined {
            Ok(Ok(value)) => {
                tracing::info!(elapsed = ?started.elapsed(), "task succeeded");
                tracing::debug!(result = %value, "task result");
                match self.report_success(&reply, value).await {
                    Ok(()) => {
                        self.counters.succeeded();
                        Settle::Ack
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to report task result");
                        self.report_failure(&reply, &ExceptionInfo::new("ReportError", e.to_string()))
                            .await;
                        Settle::Reject
                    }
                }
            }
            Ok(Err(failure)) => {
                tracing::error!(error = %failure, elapsed = ?started.elapsed(), "task failed");
                self.report_failure(&reply, &failure.exception_info()).await;
                self.counters.failed();
                Settle::Ack
            }
            Err(join_error) => {
                tracing::error!(error = %join_error, "task panicked");
                self.report_failure(
                    &reply,
                    &ExceptionInfo::new(PANIC_EXCEPTION, join_error.to_string()),
                )
                .await;
                Settle::Reject
            }
        }
    }

    async fn report_success(&self, reply: &Reply, value: serde_json::Value) -> Result<()> {
        let Some(reply_to) = &reply.reply_to else {
            return Ok(());
        };
        self.backend
            .report_result(&reply.task_id, reply_to, &reply.correlation_id, value)
            .await
    }

    /// Failure reports are best effort.
    async fn report_failure(&self, reply: &Reply, exception: &ExceptionInfo) {
        let Some(reply_to) = &reply.reply_to else {
            return;
        };
        if let Err(e) = self
            .backend
            .report_exception(&reply.task_id, reply_to, &reply.correlation_id, exception)
            .await
        {
            tracing::warn!(error = %e, "failed to report task failure");
        }
    }

    async fn settle(&self, acker: Box<dyn Acker>, settle: Settle, delivery_tag: u64) {
        let result = match settle {
            Settle::Ack => acker.ack().await,
            Settle::Reject => acker.nack(false).await,
            Settle::Requeue => acker.nack(true).await,
        };
        if settle == Settle::Reject {
            self.counters.dropped();
        }
        if let Err(e) = result {
            tracing::warn!(worker = %self.name, delivery_tag, error = %e, "failed to settle delivery");
        }
    }
}

/// Where (and whether) to send the outcome of one task.
struct Reply {
    task_id: TaskId,
    reply_to: Option<String>,
    correlation_id: String,
}

impl Reply {
    fn from_message(task_id: &TaskId, message: &Message) -> Self {
        Self {
            task_id: task_id.clone(),
            reply_to: message.reply_to.clone().filter(|r| !r.is_empty()),
            correlation_id: message
                .correlation_id
                .clone()
                .unwrap_or_else(|| task_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskResult, TaskStatus};
    use crate::impls::memory::{MemoryBackend, MemoryBroker, MemoryHub};
    use crate::ports::{QueueSpec, TransportSettings};
    use crate::typed::{MethodTable, TaskRegistry};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::sync::Notify;

    const TASKS: &str = "tasks";
    const REPLIES: &str = "replies";

    struct Setup {
        hub: MemoryHub,
        worker: Arc<Worker>,
        release: Arc<Notify>,
    }

    async fn setup() -> Setup {
        let hub = MemoryHub::new();
        let settings = TransportSettings::default();
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::connect(&hub, &settings).unwrap());
        let backend = Arc::new(MemoryBackend::connect(&hub, &settings).unwrap());
        broker.declare_queue(TASKS).await.unwrap();
        hub.declare(&QueueSpec::task_queue(REPLIES)).unwrap();

        let release = Arc::new(Notify::new());
        let gate = release.clone();
        let calc = MethodTable::new("calc")
            .method("sum", |(a, b): (i64, i64)| async move { Ok(a + b) })
            .unwrap()
            .method("check", |(flag,): (bool,)| async move {
                assert!(!flag, "kaboom");
                Ok(flag)
            })
            .unwrap()
            .method("blocked", move |_: ()| {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok("released")
                }
            })
            .unwrap();
        let tasks = Arc::new(TaskRegistry::new().with(calc).unwrap());
        let worker = Worker::start("w-0", &broker, backend, tasks, TASKS, 2)
            .await
            .unwrap();
        Setup {
            hub,
            worker: Arc::new(worker),
            release,
        }
    }

    fn task(id: Option<&str>, name: &str, args: Vec<Value>, reply_to: Option<&str>) -> Message {
        let payload = TaskPayload::new(args);
        let mut message = Message::new();
        message.body = payload.to_bytes().unwrap();
        message.headers.id = id.map(TaskId::from);
        message.headers.task = Some(name.to_string());
        message.reply_to = reply_to.map(str::to_string);
        message
    }

    fn replies(hub: &MemoryHub) -> Vec<TaskResult> {
        hub.peek(REPLIES)
            .iter()
            .map(|m| serde_json::from_slice(&m.body).unwrap())
            .collect()
    }

    async fn settled(hub: &MemoryHub, worker: &Worker, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let counts = worker.counts();
                let stats = hub.stats(TASKS).unwrap();
                if counts.received >= expected && stats.unacked == 0 && stats.ready == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn success_is_reported_with_the_correlation_id() {
        let s = setup().await;
        let mut message = task(Some("t-1"), "calc#sum", vec![json!(2), json!(3)], Some(REPLIES));
        message.correlation_id = Some("corr-1".to_string());
        s.hub.publish(TASKS, message);
        settled(&s.hub, &s.worker, 1).await;

        let sent = s.hub.peek(REPLIES);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].correlation_id.as_deref(), Some("corr-1"));
        let result: TaskResult = serde_json::from_slice(&sent[0].body).unwrap();
        assert_eq!(result.status, TaskStatus::Success);
        assert_eq!(result.result, json!(5));
        assert!(result.date_done.is_some());
        assert_eq!(s.worker.counts().succeeded, 1);
        s.worker.close().await;
    }

    #[tokio::test]
    async fn message_without_id_is_dropped_unreported() {
        let s = setup().await;
        s.hub.publish(TASKS, task(None, "calc#sum", vec![json!(1), json!(1)], Some(REPLIES)));
        settled(&s.hub, &s.worker, 1).await;

        assert!(replies(&s.hub).is_empty());
        assert_eq!(s.hub.dead_letters().len(), 1);
        assert_eq!(s.worker.counts().dropped, 1);
        s.worker.close().await;
    }

    #[tokio::test]
    async fn without_reply_to_the_task_runs_silently() {
        let s = setup().await;
        s.hub.publish(TASKS, task(Some("t-2"), "calc#sum", vec![json!(1), json!(1)], None));
        settled(&s.hub, &s.worker, 1).await;

        assert!(replies(&s.hub).is_empty());
        assert!(s.hub.dead_letters().is_empty());
        s.worker.close().await;
        assert_eq!(s.worker.counts().succeeded, 1);
    }

    #[tokio::test]
    async fn panic_is_reported_and_rejected() {
        let s = setup().await;
        s.hub.publish(TASKS, task(Some("t-3"), "calc#check", vec![json!(true)], Some(REPLIES)));
        settled(&s.hub, &s.worker, 1).await;

        let results = replies(&s.hub);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, TaskStatus::Failure);
        assert_eq!(results[0].exception().exc_type.as_deref(), Some(PANIC_EXCEPTION));
        assert_eq!(s.hub.dead_letters()[0].queue, TASKS);
        s.worker.close().await;
    }

    #[tokio::test]
    async fn undecodable_body_is_reported_and_rejected() {
        let s = setup().await;
        let mut message = task(Some("t-4"), "calc#sum", Vec::new(), Some(REPLIES));
        message.body = b"[1, 2".to_vec();
        s.hub.publish(TASKS, message);
        settled(&s.hub, &s.worker, 1).await;

        let results = replies(&s.hub);
        assert_eq!(results[0].exception().exc_type.as_deref(), Some(DECODE_EXCEPTION));
        assert_eq!(s.hub.dead_letters().len(), 1);
        s.worker.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_is_renewed_after_a_broker_restart() {
        let s = setup().await;
        s.hub.restart();
        // let the old subscription observe the restart and end
        tokio::time::sleep(Duration::from_millis(10)).await;

        s.hub.publish(TASKS, task(Some("t-5"), "calc#sum", vec![json!(4), json!(4)], Some(REPLIES)));
        settled(&s.hub, &s.worker, 1).await;

        assert_eq!(s.worker.counts().succeeded, 1);
        assert_eq!(replies(&s.hub)[0].result, json!(8));
        assert_eq!(s.hub.stats(TASKS).unwrap().consumers, 1);
        s.worker.close().await;
        assert_eq!(s.hub.stats(TASKS).unwrap().consumers, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_finishes_the_running_task_and_requeues_the_rest() {
        let s = setup().await;
        s.hub.publish(TASKS, task(Some("a"), "calc#blocked", Vec::new(), None));
        s.hub.publish(TASKS, task(Some("b"), "calc#blocked", Vec::new(), None));
        tokio::time::timeout(Duration::from_secs(5), async {
            while s.worker.counts().received < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let worker = s.worker.clone();
        let closing = tokio::spawn(async move { worker.close().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());
        s.release.notify_one();
        closing.await.unwrap();

        let counts = s.worker.counts();
        assert_eq!(counts.succeeded, 1);
        let stats = s.hub.stats(TASKS).unwrap();
        assert_eq!((stats.ready, stats.unacked, stats.consumers), (1, 0, 0));
        assert_eq!(s.hub.peek(TASKS)[0].task_id(), Some(&TaskId::new("b")));
    }
}
