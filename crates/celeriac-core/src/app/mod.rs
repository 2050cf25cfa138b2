//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **Client / ClientBuilder**: タスクの投入と結果 future
//! - **Worker / WorkerGroup**: キューの消費、dispatch、結果の報告
//! - **Dispatcher**: `<handlerId>#<methodName>` → typed method

pub mod builder;
pub mod client;
pub mod dispatch;
pub mod worker;
pub mod worker_group;

pub use self::builder::ClientBuilder;
pub use self::client::Client;
pub use self::dispatch::{Dispatcher, TaskFailure};
pub use self::worker::Worker;
pub use self::worker_group::WorkerGroup;
