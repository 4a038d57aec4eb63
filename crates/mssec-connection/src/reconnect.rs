//! Retrying connection checks
//!
//! # Example
//!
//! ```ignore
//! use mssec_connection::reconnect::{BackoffStrategy, ConnectionGuard};
//!
//! let guard = ConnectionGuard::new(3, BackoffStrategy::linear(100));
//! guard.ensure_live(session.connection(), &cancel).await?;
//! ```

mod backoff;
mod guard;


pub use backoff::{BackoffStrategy, Growth};
pub use guard::ConnectionGuard;
