//! ClientBuilder - クライアントの構築
//!
//! # Fail-fast 設計
//! - build() 時に URI の形式と scheme の対応を検証
//! - 接続は最初の submit まで遅延（LazyConnector）

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use super::client::Client;
use crate::config::{ClientConfig, ConfigError, DEFAULT_QUEUE};
use crate::domain::{ClientIdentity, TransportUri};
use crate::error::Result;
use crate::ports::{IdGenerator, SystemClock, TransportRegistry, TransportSettings, UlidGenerator};
use crate::resource::LazyConnector;

/// # 使用例
/// ```ignore
/// let client = Client::builder(transports)
///     .broker("amqp://localhost")
///     .backend("amqp://localhost")
///     .build()?;
/// ```
pub struct ClientBuilder {
    transports: TransportRegistry,
    broker_uri: Option<String>,
    backend_uri: Option<String>,
    queue: String,
    settings: TransportSettings,
    ids: Option<Arc<dyn IdGenerator>>,
    hostname: Option<String>,
}

impl ClientBuilder {
    pub fn new(transports: TransportRegistry) -> Self {
        Self {
            transports,
            broker_uri: None,
            backend_uri: None,
            queue: DEFAULT_QUEUE.to_string(),
            settings: TransportSettings::default(),
            ids: None,
            hostname: None,
        }
    }

    pub fn from_config(config: &ClientConfig, transports: TransportRegistry) -> Self {
        let mut builder = Self::new(transports)
            .broker(&config.broker_uri)
            .queue(&config.queue)
            .result_ttl(config.result_ttl())
            .channel_idle(config.channel_idle());
        if let Some(backend) = &config.backend_uri {
            builder = builder.backend(backend);
        }
        builder
    }

    pub fn broker(mut self, uri: &str) -> Self {
        self.broker_uri = Some(uri.to_string());
        self
    }

    /// Without a backend, submissions are fire-and-forget.
    pub fn backend(mut self, uri: &str) -> Self {
        self.backend_uri = Some(uri.to_string());
        self
    }

    pub fn queue(mut self, queue: &str) -> Self {
        self.queue = queue.to_string();
        self
    }

    pub fn result_ttl(mut self, ttl: Duration) -> Self {
        self.settings.result_ttl = ttl;
        self
    }

    pub fn channel_idle(mut self, idle: Duration) -> Self {
        self.settings.channel_idle = idle;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Overrides the hostname used in the client name.
    pub fn hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    /// # 検証
    /// - broker URI が設定されていること
    /// - broker / backend の scheme が登録済みであること
    pub fn build(self) -> Result<Client> {
        let Some(broker_uri) = &self.broker_uri else {
            return Err(ConfigError::Invalid {
                key: "client.broker_uri",
                reason: "a broker uri is required".to_string(),
            }
            .into());
        };
        if self.queue.is_empty() {
            return Err(ConfigError::Invalid {
                key: "client.queue",
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        let broker_uri = TransportUri::parse(broker_uri)?;
        self.transports.broker_factory(&broker_uri)?;
        let backend_uri = match &self.backend_uri {
            Some(raw) => {
                let uri = TransportUri::parse(raw)?;
                self.transports.backend_factory(&uri)?;
                Some(uri)
            }
            None => None,
        };

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));
        let client_id = ids.generate_client_id();
        let identity = match &self.hostname {
            Some(hostname) => ClientIdentity::new(client_id, hostname),
            None => ClientIdentity::for_local_host(client_id),
        };

        Ok(Client {
            identity,
            broker_uri,
            backend_uri,
            queue: self.queue,
            settings: self.settings,
            transports: self.transports,
            ids,
            broker: LazyConnector::new(),
            results: LazyConnector::new(),
            closed: AtomicBool::new(false),
            gate: tokio::sync::RwLock::new(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CeleriacError;
    use crate::impls::default_transports;
    use crate::impls::memory::MemoryHub;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn transports() -> TransportRegistry {
        default_transports(&MemoryHub::new()).unwrap()
    }

    #[test]
    fn broker_uri_is_required() {
        let err = ClientBuilder::new(transports()).build().err().unwrap();
        assert!(matches!(
            err,
            CeleriacError::Config(ConfigError::Invalid { key: "client.broker_uri", .. })
        ));
    }

    #[test]
    fn empty_queue_is_rejected() {
        let err = ClientBuilder::new(transports())
            .broker("memory://")
            .queue("")
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            CeleriacError::Config(ConfigError::Invalid { key: "client.queue", .. })
        ));
    }

    #[test]
    fn backend_scheme_is_checked_at_build() {
        let err = ClientBuilder::new(transports())
            .broker("memory://")
            .backend("redis://localhost")
            .build()
            .err()
            .unwrap();
        match err {
            CeleriacError::Configuration { scheme, .. } => assert_eq!(scheme, "redis"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_uri_is_rejected() {
        let err = ClientBuilder::new(transports())
            .broker("not a uri")
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, CeleriacError::InvalidUri(_)));
    }

    #[test]
    fn config_and_overrides_shape_the_client() {
        let config = ClientConfig {
            backend_uri: Some("memory://".to_string()),
            queue: "jobs".to_string(),
            ..ClientConfig::default()
        };
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let client = ClientBuilder::from_config(&config, transports())
            .id_generator(Arc::new(UlidGenerator::new(FixedClock::new(at))))
            .hostname("worker-box")
            .build()
            .unwrap();

        assert_eq!(client.queue(), "jobs");
        assert!(client.has_backend());
        assert!(!client.is_closed());
        let identity = client.identity();
        assert_eq!(
            identity.client_name(),
            format!("{}@worker-box", identity.client_id())
        );
        assert_eq!(client.settings.result_ttl, config.result_ttl());
    }
}
