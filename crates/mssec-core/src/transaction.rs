//! Running a batch of steps atomically
//!
//! Every multi-statement change that must be all-or-nothing goes through
//! [`run_in_transaction`]: the steps run in the order supplied on one pinned
//! connection, are committed together, and any failure rolls the whole batch
//! back. A failed rollback is logged; the caller always sees the error of the
//! step that failed. Rollbacks are bounded by [`ROLLBACK_TIMEOUT`] so an
//! unresponsive server cannot hold a cancelled batch open.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::{CancellationToken, Connection, Result, Statement, Transaction, cancellable};

/// Longest wait for a rollback before the batch gives up on it
pub const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// One step of a transactional batch
pub type TxOp = Box<dyn for<'t> FnOnce(&'t dyn Transaction) -> BoxFuture<'t, Result<()>> + Send>;

/// Box a closure as a transaction step
pub fn tx_op<F>(op: F) -> TxOp
where
    F: for<'t> FnOnce(&'t dyn Transaction) -> BoxFuture<'t, Result<()>> + Send + 'static,
{
    Box::new(op)
}

/// A transaction step that executes a single statement
pub fn statement_op(statement: Statement) -> TxOp {
    tx_op(move |tx| {
        Box::pin(async move {
            statement.execute_in(tx).await?;
            Ok(())
        })
    })
}

/// Execute `ops` in order inside one transaction.
#[tracing::instrument(skip(conn, cancel, ops), fields(steps = ops.len()))]
pub async fn run_in_transaction(
    conn: &dyn Connection,
    cancel: &CancellationToken,
    ops: Vec<TxOp>,
) -> Result<()> {
    let tx = cancellable(cancel, conn.begin_transaction()).await?;

    for (index, op) in ops.into_iter().enumerate() {
        let outcome = cancellable(cancel, op(tx.as_ref())).await;
        if let Err(err) = outcome {
            tracing::debug!(step = index, error = %err, "transaction step failed, rolling back");
            rollback_quietly(tx).await;
            return Err(err);
        }
    }

    if cancel.is_cancelled() {
        rollback_quietly(tx).await;
        return Err(crate::MssecError::Cancelled);
    }

    cancellable(cancel, tx.commit()).await?;
    tracing::debug!("transaction committed");
    Ok(())
}

async fn rollback_quietly(tx: Box<dyn Transaction>) {
    match tokio::time::timeout(ROLLBACK_TIMEOUT, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(error = %err, "rollback failed"),
        Err(_) => tracing::warn!(
            timeout_secs = ROLLBACK_TIMEOUT.as_secs(),
            "rollback did not finish in time, abandoning it"
        ),
    }
}
