//! Database user management module
//!
//! Provides functionality for validating, creating, reading, altering and
//! dropping users of the connected database, in all four authentication
//! flavors.

mod service;

#[cfg(test)]
mod tests;

pub use service::*;
