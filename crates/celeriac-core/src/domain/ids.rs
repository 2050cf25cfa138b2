//! Domain identifiers (strongly-typed IDs).
//!
//! Task ids travel on the wire as plain strings and may be produced by any
//! Celery client, so the inner value is a `String`. Ids generated here are
//! ULIDs (sortable by creation time, no coordination needed between nodes).
//!
//! `Id<T>` carries a zero-sized marker so a `TaskId` cannot be passed where a
//! `ClientId` is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

pub trait IdMarker: Send + Sync + 'static {
    /// Human-readable kind used in debug output.
    fn kind() -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    value: String,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            _marker: PhantomData,
        }
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self::new(ulid.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn into_string(self) -> String {
        self.value
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> From<&str> for Id<T> {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Client {}

impl IdMarker for Client {
    fn kind() -> &'static str {
        "client"
    }
}

/// Identifier of one submission; doubles as the correlation id.
pub type TaskId = Id<Task>;

/// Identifier of a client process; names its reply queue.
pub type ClientId = Id<Client>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_wrap_ulids() {
        let ulid = Ulid::new();
        let task = TaskId::from_ulid(ulid);
        assert_eq!(task.as_str(), ulid.to_string());
        assert_eq!(task.to_string(), ulid.to_string());
        assert_eq!(TaskId::kind_name(), "task");
        // let _: ClientId = task; // <- does not compile
    }

    #[test]
    fn foreign_ids_are_accepted_verbatim() {
        let id = TaskId::from("7f1c1c8e-2d0b-4a53-9f6e-6b7e1c0c2f11");
        assert_eq!(id.as_str(), "7f1c1c8e-2d0b-4a53-9f6e-6b7e1c0c2f11");
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ClientId::new("abc");
        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, "\"abc\"");
        let back: ClientId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn ulid_ids_are_sortable() {
        let id1 = TaskId::from_ulid(Ulid::new());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = TaskId::from_ulid(Ulid::new());
        assert!(id1 < id2);
    }

    impl<T: IdMarker> Id<T> {
        fn kind_name() -> &'static str {
            T::kind()
        }
    }
}
