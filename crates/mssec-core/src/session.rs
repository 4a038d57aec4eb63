//! A connected session and the server facts probed when it was opened

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Connection, Result};

/// Substring of `@@VERSION` that identifies Azure SQL Database
pub const AZURE_VERSION_MARKER: &str = "Microsoft SQL Azure";

/// What the dialect probe learned about the target server.
///
/// Written once while connecting and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Raw `@@VERSION` string
    pub version: String,
    /// True for Azure SQL Database
    pub is_azure: bool,
    /// Server-wide default language (e.g. `us_english`)
    pub default_language: String,
    /// `contained database authentication` server option
    pub contained_authentication: bool,
    /// Database the session is connected to
    pub database: String,
}

impl ServerInfo {
    /// Classify a `@@VERSION` string
    pub fn is_azure_version(version: &str) -> bool {
        version.contains(AZURE_VERSION_MARKER)
    }

    pub fn is_master(&self) -> bool {
        self.database.eq_ignore_ascii_case("master")
    }

    /// Whether `language` is the server default (case-insensitive)
    pub fn is_default_language(&self, language: &str) -> bool {
        self.default_language.eq_ignore_ascii_case(language)
    }
}

/// A live connection paired with its frozen [`ServerInfo`]
#[derive(Clone)]
pub struct Session {
    connection: Arc<dyn Connection>,
    server: Arc<ServerInfo>,
}

impl Session {
    pub fn new(connection: Arc<dyn Connection>, server: ServerInfo) -> Self {
        Self {
            connection,
            server: Arc::new(server),
        }
    }

    pub fn connection(&self) -> &dyn Connection {
        self.connection.as_ref()
    }

    pub fn shared_connection(&self) -> Arc<dyn Connection> {
        self.connection.clone()
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub async fn close(&self) -> Result<()> {
        self.connection.close().await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("driver", &self.connection.driver_name())
            .field("server", &self.server)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_azure_version_detection() {
        assert!(ServerInfo::is_azure_version(
            "Microsoft SQL Azure (RTM) - 12.0.2000.8"
        ));
        assert!(!ServerInfo::is_azure_version(
            "Microsoft SQL Server 2019 (RTM) - 15.0.2000.5"
        ));
    }

    #[test]
    fn test_master_detection_ignores_case() {
        let server = ServerInfo {
            database: "MASTER".into(),
            ..Default::default()
        };
        assert!(server.is_master());
        let server = ServerInfo {
            database: "appdb".into(),
            ..Default::default()
        };
        assert!(!server.is_master());
    }

    #[test]
    fn test_default_language_comparison() {
        let server = ServerInfo {
            default_language: "us_english".into(),
            ..Default::default()
        };
        assert!(server.is_default_language("US_English"));
        assert!(!server.is_default_language("Deutsch"));
    }
}
