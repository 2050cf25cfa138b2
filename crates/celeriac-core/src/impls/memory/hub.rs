//! In-process message hub shared by every memory connection.
//!
//! Mirrors the AMQP behaviours the protocol relies on: idempotent declares
//! with attribute checks, per-consumer prefetch, requeue of unsettled
//! deliveries, auto-delete queues, and silent drop of unroutable publishes.
//! A restart ends every subscription and loses the non-durable queues.
//! Persistence of messages and queue expiry are not modelled.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::{Notify, watch};

use crate::domain::Message;
use crate::error::{CeleriacError, Result};
use crate::ports::QueueSpec;

/// Point-in-time view of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub ready: usize,
    pub unacked: usize,
    /// Highest `unacked` seen on any single consumer.
    pub peak_unacked_per_consumer: usize,
    pub consumers: usize,
    pub published: u64,
}

/// A message rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub queue: String,
    pub message: Message,
}

struct QueueState {
    spec: QueueSpec,
    ready: VecDeque<Message>,
    notify: Arc<Notify>,
    consumers: usize,
    unacked: usize,
    peak_unacked_per_consumer: usize,
    published: u64,
}

impl QueueState {
    fn new(spec: QueueSpec) -> Self {
        Self {
            spec,
            ready: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            consumers: 0,
            unacked: 0,
            peak_unacked_per_consumer: 0,
            published: 0,
        }
    }
}

#[derive(Default)]
struct HubState {
    queues: HashMap<String, QueueState>,
    dead_letters: Vec<DeadLetter>,
}

struct HubInner {
    state: Mutex<HubState>,
    reachable: AtomicBool,
    next_tag: AtomicU64,
    restarts: watch::Sender<u64>,
}

/// Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

pub(crate) enum Popped {
    Message(Message, u64),
    Empty,
    Gone,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                state: Mutex::new(HubState::default()),
                reachable: AtomicBool::new(true),
                next_tag: AtomicU64::new(1),
                restarts: watch::channel(0).0,
            }),
        }
    }

    /// While unreachable, new connections and channels are refused.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn is_reachable(&self) -> bool {
        self.inner.reachable.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_reachable(&self) -> Result<()> {
        if self.is_reachable() {
            Ok(())
        } else {
            Err(CeleriacError::transport("memory hub unreachable: connection refused"))
        }
    }

    /// Like a broker restart: every subscription ends and non-durable queues
    /// are dropped with their messages. Connections stay usable.
    pub fn restart(&self) {
        let mut state = self.state();
        let lost: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| !q.spec.durable)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &lost {
            if let Some(q) = state.queues.remove(name) {
                q.notify.notify_waiters();
            }
        }
        drop(state);
        self.inner.restarts.send_modify(|n| *n += 1);
        tracing::info!(lost = lost.len(), "memory hub restarted");
    }

    pub(crate) fn restarts(&self) -> watch::Receiver<u64> {
        self.inner.restarts.subscribe()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates the queue, or checks that an existing one has the same attributes.
    pub fn declare(&self, spec: &QueueSpec) -> Result<()> {
        let mut state = self.state();
        match state.queues.get(&spec.name) {
            Some(existing) if existing.spec != *spec => Err(CeleriacError::Transport(format!(
                "PRECONDITION_FAILED - inequivalent arguments for queue '{}'",
                spec.name
            ))),
            Some(_) => Ok(()),
            None => {
                tracing::debug!(queue = %spec.name, durable = spec.durable, "queue declared");
                state
                    .queues
                    .insert(spec.name.clone(), QueueState::new(spec.clone()));
                Ok(())
            }
        }
    }

    /// Appends to `queue`. Publishing to a missing queue drops the message.
    pub fn publish(&self, queue: &str, message: Message) {
        let mut state = self.state();
        let Some(q) = state.queues.get_mut(queue) else {
            tracing::warn!(queue, task_id = ?message.task_id(), "unroutable message dropped");
            return;
        };
        q.ready.push_back(message);
        q.published += 1;
        q.notify.notify_one();
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state().queues.contains_key(queue)
    }

    pub fn stats(&self, queue: &str) -> Option<QueueStats> {
        self.state().queues.get(queue).map(|q| QueueStats {
            ready: q.ready.len(),
            unacked: q.unacked,
            peak_unacked_per_consumer: q.peak_unacked_per_consumer,
            consumers: q.consumers,
            published: q.published,
        })
    }

    /// Messages waiting in `queue`, oldest first.
    pub fn peek(&self, queue: &str) -> Vec<Message> {
        self.state()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    pub(crate) fn subscribe(&self, queue: &str) -> Result<Arc<Notify>> {
        let mut state = self.state();
        let Some(q) = state.queues.get_mut(queue) else {
            return Err(CeleriacError::Transport(format!(
                "NOT_FOUND - no queue '{queue}'"
            )));
        };
        q.consumers += 1;
        Ok(q.notify.clone())
    }

    pub(crate) fn unsubscribe(&self, queue: &str) {
        let mut state = self.state();
        let Some(q) = state.queues.get_mut(queue) else {
            return;
        };
        q.consumers = q.consumers.saturating_sub(1);
        if q.consumers == 0 && q.spec.auto_delete {
            tracing::debug!(queue, dropped = q.ready.len(), "auto-delete queue removed");
            state.queues.remove(queue);
        }
    }

    /// Takes the next ready message. `in_flight` is the consumer's unsettled
    /// count including this delivery.
    pub(crate) fn pop(&self, queue: &str, in_flight: usize) -> Popped {
        let mut state = self.state();
        let Some(q) = state.queues.get_mut(queue) else {
            return Popped::Gone;
        };
        let Some(message) = q.ready.pop_front() else {
            return Popped::Empty;
        };
        q.unacked += 1;
        q.peak_unacked_per_consumer = q.peak_unacked_per_consumer.max(in_flight);
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        Popped::Message(message, tag)
    }

    pub(crate) fn settle(&self, queue: &str, outcome: Option<SettleAs>) {
        let mut state = self.state();
        let HubState {
            queues,
            dead_letters,
        } = &mut *state;
        let Some(q) = queues.get_mut(queue) else {
            return;
        };
        q.unacked = q.unacked.saturating_sub(1);
        match outcome {
            None => {}
            Some(SettleAs::Requeue(message)) => {
                q.ready.push_front(message);
                q.notify.notify_one();
            }
            Some(SettleAs::DeadLetter(message)) => dead_letters.push(DeadLetter {
                queue: queue.to_string(),
                message,
            }),
        }
    }
}

pub(crate) enum SettleAs {
    Requeue(Message),
    DeadLetter(Message),
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}
