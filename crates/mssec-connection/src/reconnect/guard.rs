//! Connection guard run before every principal or permission operation

use std::time::Duration;

use mssec_core::{CancellationToken, Connection, MssecError, Result, cancellable};

use super::BackoffStrategy;
use crate::health::ping_database;

/// Re-pings a connection before it is used, retrying connectivity failures.
///
/// Only connectivity errors (`Connection`, `Timeout`) are retried; anything
/// else, including cancellation, is returned at once. When every attempt
/// fails the last error is surfaced.
#[derive(Debug, Clone)]
pub struct ConnectionGuard {
    max_attempts: u32,
    backoff: BackoffStrategy,
    ping_timeout: Option<Duration>,
}

impl ConnectionGuard {
    pub fn new(max_attempts: u32, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            ping_timeout: None,
        }
    }

    /// A guard that pings once and never retries
    pub fn single_attempt() -> Self {
        Self::new(1, BackoffStrategy::default())
    }

    /// Bound each ping; an expired ping counts as a connectivity failure
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = Some(timeout);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Ping `conn` until it answers or the attempts run out.
    pub async fn ensure_live(&self, conn: &dyn Connection, cancel: &CancellationToken) -> Result<()> {
        let mut attempt = 1;
        loop {
            let err = match self.ping_once(conn, cancel).await {
                Ok(()) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "connection recovered");
                    }
                    return Ok(());
                }
                Err(err) => err,
            };

            if !err.is_connectivity() || attempt >= self.max_attempts {
                return Err(err);
            }

            let delay = self.backoff.calculate_delay(attempt - 1);
            tracing::debug!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "connection check failed, retrying"
            );
            cancellable(cancel, async {
                tokio::time::sleep(delay).await;
                Ok(())
            })
            .await?;
            attempt += 1;
        }
    }

    async fn ping_once(&self, conn: &dyn Connection, cancel: &CancellationToken) -> Result<()> {
        match self.ping_timeout {
            Some(limit) => match tokio::time::timeout(limit, ping_database(conn, cancel)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(MssecError::Timeout(format!(
                    "ping did not answer within {}ms",
                    limit.as_millis()
                ))),
            },
            None => ping_database(conn, cancel).await.map(|_| ()),
        }
    }
}

impl Default for ConnectionGuard {
    /// Three attempts, 100ms × attempt between them
    fn default() -> Self {
        Self::new(3, BackoffStrategy::linear(100))
    }
}
