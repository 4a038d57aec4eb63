//! Connection and transaction traits

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;

/// A live SQL Server connection (usually a pool of them)
///
/// Parameters are bound positionally: the n-th value is visible to the
/// statement as `@Pn`.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g. "mssql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that does not return rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query and return the rows of its first result set
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Round-trip a trivial query to confirm the connection is usable
    async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }

    /// Begin a transaction pinned to a single underlying connection
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>>;

    /// Close the connection
    async fn close(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;
}

/// A database transaction
///
/// Dropping a transaction without calling `commit` or `rollback` must leave
/// the server side rolled back.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<()>;

    /// Execute a query within the transaction
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Execute a statement within the transaction
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;
}
