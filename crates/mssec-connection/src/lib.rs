//! mssec connection - liveness checks and retry
//!
//! Every principal and permission operation re-checks its connection before
//! touching the server. This crate provides the ping primitive, the backoff
//! used between attempts and the [`ConnectionGuard`] that ties them together.

pub mod health;
pub mod reconnect;

pub use health::ping_database;
pub use reconnect::{BackoffStrategy, ConnectionGuard, Growth};
