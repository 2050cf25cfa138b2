//! Domain model: wire messages, task names, ids and results.
//!
//! Nothing in here touches a transport; `ports` and `impls` build on it.

pub mod envelope;
pub mod identity;
pub mod ids;
pub mod message;
pub mod outcome;
pub mod task;
pub mod uri;

pub use envelope::{EmbedOptions, TaskPayload};
pub use identity::ClientIdentity;
pub use ids::{ClientId, Id, IdMarker, TaskId};
pub use message::{Headers, Message};
pub use outcome::{ExceptionInfo, TaskResult, TaskStatus};
pub use task::TaskName;
pub use uri::TransportUri;
