//! mssec Admin - principal and permission management for SQL Server
//!
//! This crate provides the operations behind a declarative security layer:
//! - Logins and their active sessions (`master` only)
//! - Server roles and their members
//! - Database users in contained, login-backed and external flavors
//! - Database roles and their members
//! - GRANT / DENY / REVOKE at database or schema scope
//!
//! Every operation goes through an [`AdminContext`], which owns the connected
//! session and a connection guard. DDL is composed with [`DynamicSql`] so
//! that caller-supplied names only ever reach the server as bound parameters
//! quoted by `QUOTENAME`.

mod context;
mod ddl;
mod member;

pub mod database_role;
pub mod login;
pub mod permission;
pub mod server_role;
pub mod user;
pub mod validate;

pub use context::AdminContext;
pub use ddl::DynamicSql;
pub use member::RoleMember;

pub use database_role::*;
pub use login::*;
pub use permission::*;
pub use server_role::*;
pub use user::*;
pub use validate::*;
