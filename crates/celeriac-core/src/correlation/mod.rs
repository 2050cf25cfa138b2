//! Correlation of result messages with the futures handed out by clients.

pub mod consumer;
pub mod pending;

pub use self::consumer::{ResultConsumer, Settlement};
pub use self::pending::{AlreadyResolved, AsyncResult, PendingResults, Resolution};
