//! Connections, channels and consumers over a [`MemoryHub`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};

use super::hub::{MemoryHub, Popped, SettleAs};
use crate::domain::Message;
use crate::error::{CeleriacError, Result};
use crate::ports::{Acker, Delivery, DeliveryStream, QueueSpec};
use crate::resource::{ChannelSource, PooledChannel};

pub struct MemoryConnection {
    hub: MemoryHub,
    closed: watch::Sender<bool>,
}

impl MemoryConnection {
    pub fn open(hub: &MemoryHub) -> Result<Arc<Self>> {
        hub.ensure_reachable()?;
        let (closed, _) = watch::channel(false);
        Ok(Arc::new(Self {
            hub: hub.clone(),
            closed,
        }))
    }
}

#[async_trait]
impl ChannelSource for MemoryConnection {
    type Channel = MemoryChannel;

    async fn open_channel(&self) -> Result<MemoryChannel> {
        if !self.is_open() {
            return Err(CeleriacError::transport("connection is closed"));
        }
        self.hub.ensure_reachable()?;
        Ok(MemoryChannel {
            hub: self.hub.clone(),
            open: Arc::new(AtomicBool::new(true)),
            connection_closed: self.closed.subscribe(),
        })
    }

    fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    async fn close(&self) -> Result<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MemoryChannel {
    hub: MemoryHub,
    open: Arc<AtomicBool>,
    connection_closed: watch::Receiver<bool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CeleriacError::transport("channel is closed"))
        }
    }

    pub fn declare(&self, spec: &QueueSpec) -> Result<()> {
        self.ensure_open()?;
        self.hub.declare(spec)
    }

    pub fn publish(&self, queue: &str, message: Message) -> Result<()> {
        self.ensure_open()?;
        self.hub.publish(queue, message);
        Ok(())
    }

    pub fn consume(&self, queue: &str, prefetch: u16) -> Result<MemoryConsumer> {
        self.ensure_open()?;
        let notify = self.hub.subscribe(queue)?;
        let prefetch = usize::from(prefetch.max(1));
        Ok(MemoryConsumer {
            hub: self.hub.clone(),
            queue: queue.to_string(),
            notify,
            prefetch,
            permits: Arc::new(Semaphore::new(prefetch)),
            connection_closed: self.connection_closed.clone(),
            restarts: self.hub.restarts(),
        })
    }
}

#[async_trait]
impl PooledChannel for MemoryChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !*self.connection_closed.borrow()
    }

    async fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// A subscription with at most `prefetch` unsettled deliveries.
pub struct MemoryConsumer {
    hub: MemoryHub,
    queue: String,
    notify: Arc<Notify>,
    prefetch: usize,
    permits: Arc<Semaphore>,
    connection_closed: watch::Receiver<bool>,
    restarts: watch::Receiver<u64>,
}

impl MemoryConsumer {
    fn in_flight(&self) -> usize {
        self.prefetch - self.permits.available_permits()
    }
}

#[async_trait]
impl DeliveryStream for MemoryConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => permit.ok()?,
            _ = closed(&mut self.connection_closed) => return None,
            _ = self.restarts.changed() => return None,
        };
        loop {
            let notified = self.notify.notified();
            match self.hub.pop(&self.queue, self.in_flight()) {
                Popped::Message(message, tag) => {
                    let acker = MemoryAcker {
                        hub: self.hub.clone(),
                        queue: self.queue.clone(),
                        message: Some(message.clone()),
                        _permit: permit,
                    };
                    return Some(Ok(Delivery::new(message, tag, Box::new(acker))));
                }
                Popped::Gone => return None,
                Popped::Empty => {}
            }
            tokio::select! {
                _ = notified => {}
                _ = closed(&mut self.connection_closed) => return None,
                _ = self.restarts.changed() => return None,
            }
        }
    }
}

/// Resolves once the connection is closed or gone.
async fn closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.queue);
    }
}

/// Holds a prefetch permit until the delivery is settled.
struct MemoryAcker {
    hub: MemoryHub,
    queue: String,
    /// `None` once settled.
    message: Option<Message>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(mut self: Box<Self>) -> Result<()> {
        if self.message.take().is_some() {
            self.hub.settle(&self.queue, None);
        }
        Ok(())
    }

    async fn nack(mut self: Box<Self>, requeue: bool) -> Result<()> {
        if let Some(message) = self.message.take() {
            let outcome = if requeue {
                SettleAs::Requeue(message)
            } else {
                SettleAs::DeadLetter(message)
            };
            self.hub.settle(&self.queue, Some(outcome));
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.hub.settle(&self.queue, Some(SettleAs::Requeue(message)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::impls::memory::QueueStats;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn setup(prefetch: u16) -> (MemoryHub, Arc<MemoryConnection>, MemoryChannel, MemoryConsumer) {
        let hub = MemoryHub::new();
        let connection = MemoryConnection::open(&hub).unwrap();
        let channel = connection.open_channel().await.unwrap();
        channel.declare(&QueueSpec::task_queue("q")).unwrap();
        let consumer = channel.consume("q", prefetch).unwrap();
        (hub, connection, channel, consumer)
    }

    fn message(id: &str) -> Message {
        let mut message = Message::new();
        message.headers.id = Some(TaskId::new(id));
        message
    }

    #[tokio::test]
    async fn unreachable_hub_refuses_connections() {
        let hub = MemoryHub::new();
        hub.set_reachable(false);
        assert!(MemoryConnection::open(&hub).is_err());
        hub.set_reachable(true);
        assert!(MemoryConnection::open(&hub).is_ok());
    }

    #[tokio::test]
    async fn prefetch_bounds_unsettled_deliveries() {
        let (hub, _conn, channel, mut consumer) = setup(2).await;
        for id in ["a", "b", "c"] {
            channel.publish("q", message(id)).unwrap();
        }

        let first = consumer.next_delivery().await.unwrap().unwrap();
        let _second = consumer.next_delivery().await.unwrap().unwrap();
        assert!(
            timeout(Duration::from_millis(50), consumer.next_delivery())
                .await
                .is_err()
        );

        first.ack().await.unwrap();
        let third = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(third.message.task_id(), Some(&TaskId::new("c")));
        assert_eq!(hub.stats("q").unwrap().peak_unacked_per_consumer, 2);
    }

    #[tokio::test]
    async fn dropped_delivery_is_requeued() {
        let (hub, _conn, channel, mut consumer) = setup(1).await;
        channel.publish("q", message("a")).unwrap();

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        drop(delivery);
        assert_eq!(hub.stats("q").unwrap().ready, 1);

        let again = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(again.message.task_id(), Some(&TaskId::new("a")));
        again.nack(false).await.unwrap();
        assert_eq!(hub.dead_letters().len(), 1);
        assert_eq!(
            hub.stats("q").unwrap(),
            QueueStats {
                ready: 0,
                unacked: 0,
                peak_unacked_per_consumer: 1,
                consumers: 1,
                published: 1,
            }
        );
    }

    #[tokio::test]
    async fn waiting_consumer_is_woken_by_publish() {
        let (_hub, _conn, channel, mut consumer) = setup(2).await;
        let waiter = tokio::spawn(async move { consumer.next_delivery().await.map(|d| d.is_ok()) });
        tokio::task::yield_now().await;
        channel.publish("q", message("late")).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(true));
    }

    #[tokio::test]
    async fn restart_ends_the_stream_but_not_the_connection() {
        let (hub, conn, channel, mut consumer) = setup(2).await;
        let waiter = tokio::spawn(async move { consumer.next_delivery().await.is_none() });
        tokio::task::yield_now().await;

        hub.restart();
        assert!(waiter.await.unwrap());
        assert!(channel.is_open());
        let mut again = channel.consume("q", 2).unwrap();
        channel.publish("q", message("after")).unwrap();
        let delivery = again.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.message.task_id(), Some(&TaskId::new("after")));
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn closing_the_connection_ends_the_stream() {
        let (_hub, conn, channel, mut consumer) = setup(2).await;
        conn.close().await.unwrap();
        assert!(consumer.next_delivery().await.is_none());
        assert!(!channel.is_open());
        assert!(channel.publish("q", message("x")).is_err());
        assert!(conn.open_channel().await.is_err());
    }
}
