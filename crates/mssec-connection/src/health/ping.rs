//! Database ping implementation
//!
//! Round-trips the driver's liveness query and measures how long it took.

use std::time::{Duration, Instant};

use mssec_core::{CancellationToken, Connection, MssecError, Result, cancellable};

/// Ping a connection and return the round-trip time.
///
/// A closed connection fails without a round trip. Errors from the server
/// are returned unchanged so callers can tell connectivity failures apart
/// from everything else.
pub async fn ping_database(conn: &dyn Connection, cancel: &CancellationToken) -> Result<Duration> {
    if conn.is_closed() {
        return Err(MssecError::Connection("connection is closed".into()));
    }

    let start = Instant::now();
    cancellable(cancel, conn.ping()).await?;
    let elapsed = start.elapsed();

    tracing::trace!(
        driver = conn.driver_name(),
        duration_ms = elapsed.as_millis() as u64,
        "ping ok"
    );
    Ok(elapsed)
}
