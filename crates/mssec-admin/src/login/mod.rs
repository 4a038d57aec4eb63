//! Login management module
//!
//! Server logins live in `master`. SQL-authenticated logins are read from
//! `sys.sql_logins`, directory (external) logins from `sys.server_principals`.
//! Dropping a login first kills its active sessions.

mod service;


pub use service::*;
