//! celeriac-core
//!
//! Celery-compatible task submission and execution over pluggable brokers.
//!
//! # モジュール構成
//! - **domain**: wire format（message, envelope, outcome）と識別子
//! - **ports**: Broker / Backend の SPI、TransportRegistry、Clock、IdGenerator
//! - **resource**: 接続の遅延確立とチャネルプール
//! - **correlation**: 結果メッセージと AsyncResult の対応付け
//! - **typed**: 型付きタスク API（MethodTable, TaskRegistry, FromArgs）
//! - **app**: Client / Worker / WorkerGroup / Dispatcher
//! - **impls**: memory transport と（feature `amqp`）RabbitMQ transport
//! - **config / observability**: 設定ファイルと tracing

pub mod app;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod resource;
pub mod typed;

pub use self::app::{Client, ClientBuilder, Dispatcher, Worker, WorkerGroup};
pub use self::config::CeleriacConfig;
pub use self::correlation::AsyncResult;
pub use self::domain::{TaskId, TaskName};
pub use self::error::{CeleriacError, ErrorKind, Result};
pub use self::impls::default_transports;
pub use self::impls::memory::MemoryHub;
pub use self::ports::TransportRegistry;
pub use self::typed::{MethodTable, TaskError, TaskRegistry};
