//! SQL Server driver for mssec
//!
//! Connects to on-premises SQL Server or Azure SQL Database through a bb8
//! pool of tiberius clients, authenticates with SQL or directory
//! credentials and probes the server dialect once per connect.

mod auth;
mod connection;
mod descriptor;
mod dialect;
mod token;

#[cfg(test)]
mod connection_tests;
#[cfg(test)]
mod descriptor_tests;
#[cfg(test)]
mod dialect_tests;

pub use auth::Authentication;
pub use connection::{
    MssqlConnection, MssqlConnectionError, MssqlTransaction, PoolOptions, PooledClient,
    TiberiusConnectionManager,
};
pub use descriptor::{
    APPLICATION_NAME, ConnectionDescriptor, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PORT,
};
pub use dialect::{FALLBACK_LANGUAGE, check_topology, probe};
pub use token::{SQL_TOKEN_RESOURCE, StaticTokenProvider, TokenProvider};
