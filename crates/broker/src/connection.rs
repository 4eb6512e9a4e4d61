//! Bounded connection retry.

use std::time::Duration;

use crate::broker::BrokerConnector;
use crate::error::{BrokerError, Result};

/// How hard to try when opening the broker connection at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Total attempts before giving up.
    pub max_attempts: u32,
    /// Fixed pause between attempts.
    pub retry_delay: Duration,
    /// Upper bound on a single attempt.
    pub connect_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts,
            retry_delay,
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Opens a connection, retrying up to `settings.max_attempts` times with a
/// fixed delay between attempts.
///
/// Exhausting the attempts returns [`BrokerError::ConnectionExhausted`],
/// which callers treat as fatal.
#[tracing::instrument(skip(connector))]
pub async fn connect_with_retry<C>(
    connector: &C,
    settings: &ConnectionSettings,
) -> Result<C::Connection>
where
    C: BrokerConnector + ?Sized,
{
    let attempts = settings.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        metrics::counter!("broker_connect_attempts_total").increment(1);

        let result = match tokio::time::timeout(settings.connect_timeout, connector.connect()).await
        {
            Ok(result) => result,
            Err(_) => Err(BrokerError::ConnectionFailed(format!(
                "timed out after {:?}",
                settings.connect_timeout
            ))),
        };

        match result {
            Ok(connection) => {
                tracing::info!(attempt, "connected to broker");
                return Ok(connection);
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    "broker not ready"
                );
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(settings.retry_delay).await;
                }
            }
        }
    }

    tracing::error!(attempts, error = %last_error, "giving up on broker connection");
    Err(BrokerError::ConnectionExhausted {
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::memory::{InMemoryBroker, InMemoryConnection};

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_refusals() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connections(2).await;

        let start = tokio::time::Instant::now();
        let settings = ConnectionSettings::new(5, Duration::from_secs(2));
        let connection = connect_with_retry(&broker, &settings).await;

        assert!(connection.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(4));
        assert_eq!(broker.connection_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_is_an_error() {
        let broker = InMemoryBroker::new();
        broker.refuse_next_connections(10).await;

        let settings = ConnectionSettings::new(3, Duration::from_secs(2));
        let result = connect_with_retry(&broker, &settings).await;

        match result {
            Err(BrokerError::ConnectionExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("refused"));
            }
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected exhaustion"),
        }
        assert_eq!(broker.connection_count().await, 0);
    }

    /// Connector whose attempts never complete.
    struct HangingConnector {
        calls: AtomicU32,
    }

    #[async_trait]
    impl BrokerConnector for HangingConnector {
        type Connection = InMemoryConnection;

        async fn connect(&self) -> Result<InMemoryConnection> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_is_bounded() {
        let connector = HangingConnector {
            calls: AtomicU32::new(0),
        };
        let settings = ConnectionSettings::new(2, Duration::from_secs(1))
            .with_connect_timeout(Duration::from_secs(5));

        let result = connect_with_retry(&connector, &settings).await;

        assert!(matches!(result, Err(BrokerError::ConnectionExhausted { .. })));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }
}
