//! Permission management module
//!
//! GRANT, DENY and REVOKE of named permissions to database roles, either
//! database-wide or on a schema, plus reads of what is currently recorded in
//! `sys.database_permissions`.

mod service;


pub use service::*;
