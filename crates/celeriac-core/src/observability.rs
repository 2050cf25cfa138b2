//! Logging setup and worker counters.

use std::ops::Add;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize tracing for the process.
///
/// `RUST_LOG` overrides `config.filter`. Safe to call multiple times
/// (subsequent calls are no-ops).
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Per-worker delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub received: usize,
    pub succeeded: usize,
    /// Dispatch errors and handler errors, reported back and acked.
    pub failed: usize,
    /// Deliveries rejected without requeue.
    pub dropped: usize,
}

impl Add for WorkerCounts {
    type Output = WorkerCounts;

    fn add(self, other: WorkerCounts) -> WorkerCounts {
        WorkerCounts {
            received: self.received + other.received,
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            dropped: self.dropped + other.dropped,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    received: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    dropped: AtomicUsize,
}

impl WorkerCounters {
    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WorkerCounts {
        WorkerCounts {
            received: self.received.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
