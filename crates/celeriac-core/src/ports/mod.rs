//! Ports - transport SPI and small infrastructure abstractions.
//!
//! Brokers carry task messages to workers, backends carry results back;
//! `TransportRegistry` picks the implementation by URI scheme.

pub mod backend;
pub mod broker;
pub mod clock;
pub mod delivery;
pub mod discovery;
pub mod id_generator;

pub use self::backend::{Backend, BackendFactory, ResultsProvider};
pub use self::broker::{Broker, BrokerFactory, QueueSpec, REPLY_QUEUE_EXPIRY, TransportSettings};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delivery::{Acker, Delivery, DeliveryStream};
pub use self::discovery::TransportRegistry;
pub use self::id_generator::{IdGenerator, UlidGenerator};
