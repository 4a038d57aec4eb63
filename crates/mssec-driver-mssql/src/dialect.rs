//! Server dialect probe
//!
//! Azure SQL Database and on-premises SQL Server disagree on where logins
//! live, whether a user may carry a default language and which principals can
//! be created at all. The probe runs once per connect and its answers are
//! frozen into the session's [`ServerInfo`].

use mssec_core::{CancellationToken, Connection, MssecError, Result, ServerInfo, cancellable};

pub(crate) const VERSION_QUERY: &str = "SELECT @@VERSION AS version";

/// `value_in_use` is a `sql_variant`, which has to be cast before it can be
/// read over TDS.
pub(crate) const DEFAULT_LANGUAGE_QUERY: &str = "SELECT l.name AS name \
     FROM sys.configurations AS c \
     INNER JOIN sys.syslanguages AS l ON l.langid = CAST(c.value_in_use AS INT) \
     WHERE c.name = 'default language'";

pub(crate) const CONTAINED_AUTH_QUERY: &str = "SELECT CAST(value_in_use AS INT) AS value \
     FROM sys.configurations \
     WHERE name = 'contained database authentication'";

/// Used when the server does not expose its default language
pub const FALLBACK_LANGUAGE: &str = "us_english";

/// Ask the server what it is: version, default language and whether
/// contained database authentication is enabled.
#[tracing::instrument(skip(conn, cancel))]
pub async fn probe(
    conn: &dyn Connection,
    database: &str,
    cancel: &CancellationToken,
) -> Result<ServerInfo> {
    let version = cancellable(cancel, conn.query(VERSION_QUERY, &[]))
        .await?
        .into_first_row()
        .ok_or_else(|| MssecError::Driver("@@VERSION returned no row".into()))?
        .string("version")?;
    let is_azure = ServerInfo::is_azure_version(&version);

    let default_language = match cancellable(cancel, conn.query(DEFAULT_LANGUAGE_QUERY, &[]))
        .await?
        .into_first_row()
    {
        Some(row) => row.string("name")?,
        None => String::new(),
    };
    let default_language = if default_language.is_empty() {
        FALLBACK_LANGUAGE.to_string()
    } else {
        default_language
    };

    let contained_authentication =
        match cancellable(cancel, conn.query(CONTAINED_AUTH_QUERY, &[]))
            .await?
            .into_first_row()
        {
            Some(row) => row.i32("value")? == 1,
            None => false,
        };

    tracing::debug!(
        is_azure,
        contained_authentication,
        default_language = %default_language,
        "server probed"
    );

    Ok(ServerInfo {
        version,
        is_azure,
        default_language,
        contained_authentication,
        database: database.to_string(),
    })
}

/// Refuse targets that are neither Azure nor contained-auth enabled, unless
/// the caller opted out of that requirement.
pub fn check_topology(server: &ServerInfo, require_contained: bool) -> Result<()> {
    if require_contained && !server.is_azure && !server.contained_authentication {
        return Err(MssecError::topology(
            "on-premises server does not have contained database authentication enabled",
        ));
    }
    Ok(())
}
