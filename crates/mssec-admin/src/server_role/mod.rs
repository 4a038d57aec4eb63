//! Server role management module
//!
//! User-defined server roles and their login members. Server roles exist only
//! on SQL Server instances; every change must run from `master` and is
//! rejected on Azure SQL Database.

mod service;


pub use service::*;
