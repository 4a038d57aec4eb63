//! mssec core - shared abstractions for SQL Server principal management
//!
//! This crate provides the types every other mssec crate depends on:
//!
//! - `Connection` / `Transaction` - async traits implemented by drivers
//! - `Value`, `Row`, `QueryResult` - parameter and result types
//! - `Session` / `ServerInfo` - a connection with its probed server facts
//! - `run_in_transaction` - all-or-nothing execution of ordered steps
//! - `cancellable` - cancellation of in-flight I/O
//! - `MssecError` - the error taxonomy

mod cancel;
mod connection;
mod error;
mod session;
mod statement;
pub mod transaction;
mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cancel::{CancellationToken, cancellable};
pub use connection::*;
pub use error::*;
pub use session::*;
pub use statement::*;
pub use transaction::{TxOp, run_in_transaction, statement_op, tx_op};
pub use types::*;
