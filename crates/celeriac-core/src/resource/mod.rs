//! Connection and channel lifecycle.

pub mod backoff;
pub mod connector;
pub mod pool;

pub use self::backoff::Backoff;
pub use self::connector::{ConnectorState, LazyConnector};
pub use self::pool::{ChannelPool, ChannelSource, ContextKey, PooledChannel, reaper_period};
