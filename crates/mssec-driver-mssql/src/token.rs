//! Access tokens for directory authentication
//!
//! Acquiring Entra ID tokens is left to the embedding application. The
//! connector asks a [`TokenProvider`] for a fresh token every time the pool
//! opens a physical connection.

use async_trait::async_trait;

use mssec_core::Result;

use crate::Authentication;

/// Resource (audience) requested for Azure SQL tokens
pub const SQL_TOKEN_RESOURCE: &str = "https://database.windows.net/";

/// Source of OAuth access tokens for directory authentication
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Return a bearer token for `resource`, acquired with `auth`
    async fn access_token(&self, auth: &Authentication, resource: &str) -> Result<String>;
}

/// A provider that always hands out the same pre-acquired token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _auth: &Authentication, _resource: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}
