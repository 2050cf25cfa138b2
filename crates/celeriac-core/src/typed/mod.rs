//! Typed task API.
//!
//! # 二層構造
//! - **表層（Typed）**: `MethodTable` にクロージャを登録、引数は `FromArgs` で変換
//! - **内部（Dyn）**: `TaskHandler` / `TaskMethod` trait - object-safe
//!
//! worker は `TaskLookup` だけに依存する。

pub mod codec;
pub mod handler;
pub mod registry;

pub use self::codec::{ArgumentError, FromArgs};
pub use self::handler::{InvokeError, MethodTable, TaskError, TaskHandler, TaskMethod};
pub use self::registry::{TaskLookup, TaskRegistry};
