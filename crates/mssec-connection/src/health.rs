//! Health check functionality for database connections
//!
//! # Example
//!
//! ```ignore
//! use mssec_connection::health::ping_database;
//!
//! let latency = ping_database(session.connection(), &cancel).await?;
//! tracing::info!(latency_ms = latency.as_millis() as u64, "server reachable");
//! ```

mod ping;


pub use ping::ping_database;
