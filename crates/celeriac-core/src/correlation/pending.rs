//! Single-assignment result futures, one per task id.
//!
//! A future is created by whichever comes first: the client registering
//! interest, or the result delivery. It is resolved at most once; entries live
//! until their TTL (measured from creation) elapses, resolved or not, so
//! duplicate deliveries keep being detected.
//!
//! Entries expire in creation order, so purging pops from the front of an
//! expiry queue instead of scanning the map.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::domain::TaskId;
use crate::error::{CeleriacError, RemoteTaskError, Result};

/// Terminal value of a task as seen by the client.
pub type Resolution = std::result::Result<Value, RemoteTaskError>;

type Slot = Option<Resolution>;

/// Handle to the eventual result of one submission.
///
/// Cloning is cheap; all clones observe the same resolution. Dropping the
/// handle does not retract the task.
#[derive(Debug, Clone)]
pub struct AsyncResult {
    task_id: TaskId,
    state: ResultState,
}

#[derive(Debug, Clone)]
enum ResultState {
    /// Fire-and-forget: resolved, carries no value.
    Empty,
    Pending(watch::Receiver<Slot>),
}

impl AsyncResult {
    /// An already-resolved result with no value.
    pub fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: ResultState::Empty,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn is_ready(&self) -> bool {
        match &self.state {
            ResultState::Empty => true,
            ResultState::Pending(rx) => rx.borrow().is_some(),
        }
    }

    /// Waits for the result. `Ok(None)` for fire-and-forget submissions.
    ///
    /// No timeout is applied; wrap in `tokio::time::timeout` if needed.
    pub async fn get(&self) -> Result<Option<Value>> {
        let ResultState::Pending(rx) = &self.state else {
            return Ok(None);
        };
        let mut rx = rx.clone();
        let resolution = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => return Err(CeleriacError::ResultExpired(self.task_id.clone())),
        };
        match resolution {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(remote)) => Err(CeleriacError::RemoteTask(remote)),
            None => Err(CeleriacError::ResultExpired(self.task_id.clone())),
        }
    }

    /// Like [`get`](Self::get), decoding the value into `R`.
    pub async fn get_as<R: DeserializeOwned>(&self) -> Result<Option<R>> {
        match self.get().await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

/// Rejected resolution of a task that was already resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {0} was already resolved")]
pub struct AlreadyResolved(pub TaskId);

struct Expiry {
    created_at: Instant,
    task_id: TaskId,
}

/// Every map entry has exactly one expiry record; only `purge` removes either.
#[derive(Default)]
struct Entries {
    map: HashMap<TaskId, watch::Sender<Slot>>,
    /// Ordered by `created_at`.
    expiry: VecDeque<Expiry>,
}

impl Entries {
    fn get_or_create(&mut self, task_id: &TaskId) -> &watch::Sender<Slot> {
        let Self { map, expiry } = self;
        map.entry(task_id.clone()).or_insert_with(|| {
            expiry.push_back(Expiry {
                created_at: Instant::now(),
                task_id: task_id.clone(),
            });
            watch::channel(None).0
        })
    }

    fn purge(&mut self, ttl: Duration) -> usize {
        let mut purged = 0;
        while self
            .expiry
            .front()
            .is_some_and(|oldest| oldest.created_at.elapsed() >= ttl)
        {
            let Some(expired) = self.expiry.pop_front() else {
                break;
            };
            if let Some(tx) = self.map.remove(&expired.task_id) {
                if tx.borrow().is_none() {
                    tracing::debug!(task_id = %expired.task_id, "result expired before delivery");
                }
                purged += 1;
            }
        }
        purged
    }
}

/// Per-client cache of result futures.
pub struct PendingResults {
    ttl: Duration,
    entries: Mutex<Entries>,
}

impl PendingResults {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// The future for `task_id`, created if absent.
    pub fn get_result(&self, task_id: &TaskId) -> AsyncResult {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.purge(self.ttl);
        let tx = entries.get_or_create(task_id);
        AsyncResult {
            task_id: task_id.clone(),
            state: ResultState::Pending(tx.subscribe()),
        }
    }

    /// Resolves `task_id`, creating the entry if no one asked yet.
    /// The first resolution wins.
    pub fn resolve(
        &self,
        task_id: &TaskId,
        resolution: Resolution,
    ) -> std::result::Result<(), AlreadyResolved> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.purge(self.ttl);
        let tx = entries.get_or_create(task_id);
        let mut resolution = Some(resolution);
        let accepted = tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = resolution.take();
            true
        });
        if accepted {
            Ok(())
        } else {
            Err(AlreadyResolved(task_id.clone()))
        }
    }

    /// Drops entries older than the TTL. Waiters on an unresolved expired
    /// entry observe `ResultExpired`.
    pub fn purge_expired(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .purge(self.ttl)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
