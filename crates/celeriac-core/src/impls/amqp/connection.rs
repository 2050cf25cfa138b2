use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use lapin::acker::Acker as LapinAcker;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;

use crate::domain::{Headers, Message, TaskId, TransportUri};
use crate::error::{CeleriacError, Result};
use crate::ports::{Acker, Delivery, DeliveryStream, QueueSpec};
use crate::resource::{ChannelSource, PooledChannel};

/// Delivery modes of AMQP 0-9-1.
pub(crate) const TRANSIENT: u8 = 1;
pub(crate) const PERSISTENT: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// A RabbitMQ connection that is re-established on demand.
///
/// lapin does not recover lost connections. The next channel request after a
/// drop opens a fresh connection; channels of the old one report closed and
/// are replaced by the pool.
pub struct AmqpConnection {
    uri: TransportUri,
    connection: Mutex<Connection>,
    closed: AtomicBool,
}

impl AmqpConnection {
    pub async fn open(uri: &TransportUri) -> Result<Arc<Self>> {
        let connection = connect(uri).await?;
        tracing::info!(uri = %uri, "connected to amqp broker");
        Ok(Arc::new(Self {
            uri: uri.clone(),
            connection: Mutex::new(connection),
            closed: AtomicBool::new(false),
        }))
    }
}

async fn connect(uri: &TransportUri) -> Result<Connection> {
    Connection::connect(uri.as_str(), ConnectionProperties::default())
        .await
        .map_err(CeleriacError::transport)
}

#[async_trait]
impl ChannelSource for AmqpConnection {
    type Channel = AmqpChannel;

    async fn open_channel(&self) -> Result<AmqpChannel> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(CeleriacError::transport("amqp connection is closed"));
        }
        let mut connection = self.connection.lock().await;
        if !connection.status().connected() {
            tracing::warn!(uri = %self.uri, "amqp connection lost; reconnecting");
            *connection = connect(&self.uri).await?;
            tracing::info!(uri = %self.uri, "reconnected to amqp broker");
        }
        let channel = connection
            .create_channel()
            .await
            .map_err(CeleriacError::transport)?;
        Ok(AmqpChannel { channel })
    }

    /// A connection being replaced counts as open.
    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self
                .connection
                .try_lock()
                .map_or(true, |connection| connection.status().connected())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let connection = self.connection.lock().await;
        if !connection.status().connected() {
            return Ok(());
        }
        connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(CeleriacError::transport)
    }
}

#[derive(Clone)]
pub struct AmqpChannel {
    channel: Channel,
}

impl AmqpChannel {
    pub async fn declare(&self, spec: &QueueSpec) -> Result<()> {
        let mut arguments = FieldTable::default();
        if let Some(expires) = spec.expires {
            let millis = i32::try_from(expires.as_millis()).unwrap_or(i32::MAX);
            arguments.insert(ShortString::from("x-expires"), AMQPValue::LongInt(millis));
        }
        let options = QueueDeclareOptions {
            durable: spec.durable,
            auto_delete: spec.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(&spec.name, options, arguments)
            .await
            .map_err(CeleriacError::transport)?;
        Ok(())
    }

    /// Publishes through the default exchange, routed by queue name.
    pub async fn publish(&self, queue: &str, message: &Message, delivery_mode: u8) -> Result<()> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties_of(message, delivery_mode),
            )
            .await
            .map_err(CeleriacError::transport)?
            .await
            .map_err(CeleriacError::transport)?;
        Ok(())
    }

    /// Subscribes on this channel, which the returned consumer then owns.
    pub async fn consume(self, queue: &str, prefetch: u16) -> Result<AmqpConsumer> {
        self.channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(CeleriacError::transport)?;
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(CeleriacError::transport)?;
        Ok(AmqpConsumer {
            channel: self,
            consumer,
        })
    }
}

#[async_trait]
impl PooledChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn close(&self) -> Result<()> {
        self.channel
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(CeleriacError::transport)
    }

    fn abort(&self) {
        let channel = self.channel.clone();
        tokio::spawn(async move {
            if let Err(e) = channel.close(REPLY_SUCCESS, "idle").await {
                tracing::debug!(error = %e, "ignoring error when aborting channel");
            }
        });
    }
}

pub struct AmqpConsumer {
    channel: AmqpChannel,
    consumer: Consumer,
}

#[async_trait]
impl DeliveryStream for AmqpConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let delivery = match self.consumer.next().await? {
            Ok(delivery) => delivery,
            Err(e) if !self.channel.is_open() => {
                tracing::warn!(error = %e, "amqp consumer channel closed");
                return None;
            }
            Err(e) => return Some(Err(CeleriacError::transport(e))),
        };
        let message = message_of(&delivery.properties, delivery.data);
        let acker = Box::new(AmqpAcker {
            acker: delivery.acker,
        });
        Some(Ok(Delivery::new(message, delivery.delivery_tag, acker)))
    }
}

impl Drop for AmqpConsumer {
    fn drop(&mut self) {
        // unacknowledged deliveries go back to the queue with the channel
        if self.channel.is_open() {
            self.channel.abort();
        }
    }
}

struct AmqpAcker {
    acker: LapinAcker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(CeleriacError::transport)
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        self.acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map(|_| ())
            .map_err(CeleriacError::transport)
    }
}

fn properties_of(message: &Message, delivery_mode: u8) -> BasicProperties {
    let mut headers = FieldTable::default();
    let fields = [
        ("id", message.headers.id.as_ref().map(TaskId::to_string)),
        ("task", message.headers.task.clone()),
        ("argsrepr", message.headers.argsrepr.clone()),
        ("origin", message.headers.origin.clone()),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            headers.insert(
                ShortString::from(key),
                AMQPValue::LongString(LongString::from(value)),
            );
        }
    }

    let mut properties = BasicProperties::default()
        .with_content_type(ShortString::from(message.content_type.as_str()))
        .with_content_encoding(ShortString::from(message.content_encoding.as_str()))
        .with_delivery_mode(delivery_mode)
        .with_headers(headers);
    if let Some(reply_to) = &message.reply_to {
        properties = properties.with_reply_to(ShortString::from(reply_to.as_str()));
    }
    if let Some(correlation_id) = &message.correlation_id {
        properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
    }
    properties
}

fn message_of(properties: &BasicProperties, body: Vec<u8>) -> Message {
    let header = |key: &str| -> Option<String> {
        let table = properties.headers().as_ref()?;
        let (_, value) = table.inner().iter().find(|(name, _)| name.as_str() == key)?;
        match value {
            AMQPValue::LongString(text) => {
                Some(String::from_utf8_lossy(text.as_bytes()).into_owned())
            }
            AMQPValue::ShortString(text) => Some(text.as_str().to_string()),
            _ => None,
        }
    };
    let text = |value: &Option<ShortString>| value.as_ref().map(|v| v.as_str().to_string());

    Message {
        content_type: text(properties.content_type()).unwrap_or_default(),
        content_encoding: text(properties.content_encoding()).unwrap_or_default(),
        body,
        headers: Headers {
            id: header("id").map(TaskId::new),
            task: header("task"),
            argsrepr: header("argsrepr"),
            origin: header("origin"),
        },
        reply_to: text(properties.reply_to()),
        correlation_id: text(properties.correlation_id()),
    }
}
