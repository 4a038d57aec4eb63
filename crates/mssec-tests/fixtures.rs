//! Test fixtures for live-server integration tests.
//!
//! Tests identify their target with [`TestServer`]. A server is enabled by
//! its gating flag (`MSSEC_TEST_ONPREM` or `MSSEC_TEST_AZURE`); connection
//! details come from the `MSSEC_ONPREM_*` / `MSSEC_AZURE_*` variables.
//!
//! ```rust,ignore
//! use mssec_tests::fixtures::{TestServer, admin_context, Target};
//! use rstest::rstest;
//!
//! #[rstest]
//! #[case::onprem(TestServer::OnPrem)]
//! #[case::azure(TestServer::Azure)]
//! #[tokio::test]
//! async fn test_something(#[case] server: TestServer) -> anyhow::Result<()> {
//!     let Some(ctx) = admin_context(server, Target::App).await? else {
//!         return Ok(());
//!     };
//!     // test code...
//!     Ok(())
//! }
//! ```

use std::env;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

use mssec_admin::AdminContext;
use mssec_core::CancellationToken;
use mssec_driver_mssql::{Authentication, ConnectionDescriptor};

/// Server flavor under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestServer {
    /// SQL Server on premises (or in a container)
    OnPrem,
    /// Azure SQL Database
    Azure,
}

/// Which database of the server to connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// `master`, for logins and server roles
    Master,
    /// The configured application database
    App,
}

impl TestServer {
    fn gate(&self) -> &'static str {
        match self {
            TestServer::OnPrem => "MSSEC_TEST_ONPREM",
            TestServer::Azure => "MSSEC_TEST_AZURE",
        }
    }

    fn prefix(&self) -> &'static str {
        match self {
            TestServer::OnPrem => "MSSEC_ONPREM",
            TestServer::Azure => "MSSEC_AZURE",
        }
    }

    /// Whether the gating flag for this server is set
    pub fn enabled(&self) -> bool {
        env::var(self.gate())
            .map(|v| !v.is_empty() && v != "0" && v != "false")
            .unwrap_or(false)
    }

    fn var(&self, name: &str) -> Result<String> {
        let key = format!("{}_{}", self.prefix(), name);
        env::var(&key).with_context(|| format!("{} is not set", key))
    }

    fn credentials(&self) -> Result<Authentication> {
        let (user, password) = match self {
            TestServer::OnPrem => (self.var("USER")?, self.var("PASSWORD")?),
            TestServer::Azure => (self.var("SQL_USER")?, self.var("SQL_PASSWORD")?),
        };
        Ok(Authentication::local(user, password))
    }

    /// Descriptor for `target` on this server
    pub fn descriptor(&self, target: Target) -> Result<ConnectionDescriptor> {
        let database = match target {
            Target::Master => "master".to_string(),
            Target::App => self.var("DATABASE")?,
        };
        let mut descriptor = ConnectionDescriptor::new(self.var("HOST")?, database, self.credentials()?)
            .context("invalid test connection descriptor")?;
        if let Ok(port) = self.var("PORT") {
            descriptor = descriptor.with_port(port.parse().context("invalid port")?);
        }
        if *self == TestServer::OnPrem {
            // Local containers use self-signed certificates.
            descriptor = descriptor.with_trust_cert(true);
        }
        Ok(descriptor)
    }
}

static TRACING: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
});

/// Install the test subscriber once per process
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Connect to `target` on `server`, or `None` when the server is not enabled
pub async fn admin_context(server: TestServer, target: Target) -> Result<Option<AdminContext>> {
    init_tracing();
    if !server.enabled() {
        tracing::info!(server = ?server, "skipping, gating flag not set");
        return Ok(None);
    }

    let session = server
        .descriptor(target)?
        .connect(&CancellationToken::new())
        .await
        .with_context(|| format!("failed to connect to {:?}", server))?;
    Ok(Some(AdminContext::new(session)))
}

/// A principal name unique to this test run
pub fn unique_name(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// A password that satisfies the default SQL Server policy
pub fn test_password() -> String {
    format!("Mssec#{}a1", uuid::Uuid::new_v4().simple())
}
