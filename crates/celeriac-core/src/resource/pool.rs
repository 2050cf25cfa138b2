//! Channel pool: one channel per execution context over a shared connection.
//!
//! Each context (a thread, or an explicit key such as a worker name) gets its
//! own channel. A thread key does not confine a channel to one task: on a
//! multi-thread runtime every task polled on that worker thread shares it,
//! across `.await`s. `PooledChannel` implementations must therefore accept
//! concurrent use; callers that need a channel to themselves pass a
//! [`ContextKey::Named`] key.
//!
//! Idle channels are closed by `evict_idle`, which `spawn_reaper` runs
//! periodically.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;

/// A connection that can open channels.
#[async_trait]
pub trait ChannelSource: Send + Sync + 'static {
    type Channel: PooledChannel;

    async fn open_channel(&self) -> Result<Self::Channel>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// A channel that may be used by several tasks at once.
#[async_trait]
pub trait PooledChannel: Clone + Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Graceful close.
    async fn close(&self) -> Result<()>;

    /// Immediate close; errors are ignored.
    fn abort(&self);
}

/// Identity of the context a channel is confined to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Thread(ThreadId),
    Named(String),
}

impl ContextKey {
    pub fn current_thread() -> Self {
        Self::Thread(std::thread::current().id())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// How often the reaper of a pool with `idle` timeout should run.
pub fn reaper_period(idle: Duration) -> Duration {
    idle.clamp(Duration::from_secs(1), Duration::from_secs(60))
}

struct Slot<C> {
    channel: C,
    last_used: Instant,
}

pub struct ChannelPool<S: ChannelSource> {
    source: Arc<S>,
    idle_timeout: Duration,
    slots: Mutex<HashMap<ContextKey, Slot<S::Channel>>>,
}

impl<S: ChannelSource> ChannelPool<S> {
    pub fn new(source: Arc<S>, idle_timeout: Duration) -> Self {
        Self {
            source,
            idle_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Channel of the calling thread, shared with other tasks on it.
    pub async fn get_channel(&self) -> Result<S::Channel> {
        self.get_channel_for(ContextKey::current_thread()).await
    }

    /// Channel for `key`, opened on first use. A failed open is not cached;
    /// a cached channel found closed is replaced.
    pub async fn get_channel_for(&self, key: ContextKey) -> Result<S::Channel> {
        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get_mut(&key) {
            if slot.channel.is_open() {
                slot.last_used = Instant::now();
                return Ok(slot.channel.clone());
            }
            tracing::debug!(?key, "replacing closed channel");
            slots.remove(&key);
        }

        let channel = self.source.open_channel().await?;
        slots.insert(
            key,
            Slot {
                channel: channel.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(channel)
    }

    /// Closes and removes channels idle past the timeout. The close is
    /// skipped when the connection is already gone.
    pub async fn evict_idle(&self) -> usize {
        let expired: Vec<(ContextKey, S::Channel)> = {
            let mut slots = self.slots.lock().await;
            let keys: Vec<ContextKey> = slots
                .iter()
                .filter(|(_, slot)| slot.last_used.elapsed() >= self.idle_timeout)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| slots.remove(&key).map(|slot| (key, slot.channel)))
                .collect()
        };

        if self.source.is_open() {
            for (key, channel) in &expired {
                tracing::debug!(?key, "closing idle channel");
                channel.abort();
            }
        }
        expired.len()
    }

    /// Aborts and forgets the channel of `key`, if any.
    pub async fn abort(&self, key: &ContextKey) {
        if let Some(slot) = self.slots.lock().await.remove(key) {
            slot.channel.abort();
        }
    }

    /// Closes every channel, then the connection. Channel close failures are
    /// logged and do not stop the shutdown.
    pub async fn close(&self) -> Result<()> {
        let drained: Vec<(ContextKey, Slot<S::Channel>)> =
            self.slots.lock().await.drain().collect();
        for (key, slot) in drained {
            if let Err(e) = slot.channel.close().await {
                tracing::info!(?key, error = %e, "error when closing channel");
            }
        }
        self.source.close().await
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Runs `evict_idle` every `period` until the pool is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let pool: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let evicted = pool.evict_idle().await;
                if evicted > 0 {
                    tracing::debug!(evicted, "evicted idle channels");
                }
            }
        })
    }
}
