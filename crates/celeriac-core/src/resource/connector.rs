use std::future::Future;

use tokio::sync::OnceCell;

use crate::error::Result;

/// What a [`LazyConnector`] holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorState<T> {
    Unconnected,
    Connected(T),
}

/// Connects on first use and memoizes the success.
///
/// Connection attempts are serialized; a failed attempt leaves the connector
/// unconnected so the next caller retries.
pub struct LazyConnector<T> {
    cell: OnceCell<T>,
}

impl<T: Clone> LazyConnector<T> {
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    pub async fn get_or_connect<F, Fut>(&self, connect: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell.get_or_try_init(connect).await.cloned()
    }

    /// The current state; never attempts a connection.
    pub fn state(&self) -> ConnectorState<T> {
        match self.cell.get() {
            Some(value) => ConnectorState::Connected(value.clone()),
            None => ConnectorState::Unconnected,
        }
    }
}

impl<T: Clone> Default for LazyConnector<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CeleriacError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn memoizes_success() {
        let connector = LazyConnector::new();
        let attempts = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = connector
                .get_or_connect(|| async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(connector.state(), ConnectorState::Connected(42));
    }

    #[tokio::test]
    async fn failure_is_not_cached() {
        let connector: LazyConnector<u32> = LazyConnector::new();
        let err = connector
            .get_or_connect(|| async { Err(CeleriacError::transport("refused")) })
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(connector.state(), ConnectorState::Unconnected);

        let value = connector.get_or_connect(|| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_attempt() {
        let connector = Arc::new(LazyConnector::new());
        let attempts = Arc::new(AtomicUsize::new(0));

        let mut joins = Vec::new();
        for _ in 0..8 {
            let connector = connector.clone();
            let attempts = attempts.clone();
            joins.push(tokio::spawn(async move {
                connector
                    .get_or_connect(|| async move {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok("conn")
                    })
                    .await
            }));
        }
        for join in joins {
            assert_eq!(join.await.unwrap().unwrap(), "conn");
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
