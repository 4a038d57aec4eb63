//! Database role management module
//!
//! Roles of the connected database and their members (users or other
//! roles). Permissions are granted to these roles through
//! [`crate::permission`].

mod service;


pub use service::*;
