//! Connection descriptor: where to connect and how to authenticate

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiberius::{Config, EncryptionLevel};
use url::Url;

use mssec_core::{CancellationToken, Connection, MssecError, Result, Session, cancellable};

use crate::connection::{MssqlConnection, PoolOptions, TiberiusConnectionManager};
use crate::dialect::{check_topology, probe};
use crate::{Authentication, TokenProvider};

pub const DEFAULT_PORT: u16 = 1433;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Application tag sent to the server as `app name`
pub const APPLICATION_NAME: &str = "mssec";

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

fn default_pool_size() -> u32 {
    PoolOptions::default().max_size
}

/// Everything needed to open a [`Session`] against one server and database.
///
/// # Example
///
/// ```ignore
/// use mssec_driver_mssql::{Authentication, ConnectionDescriptor};
///
/// let descriptor = ConnectionDescriptor::new(
///     "sql.internal",
///     "master",
///     Authentication::local("sa", "secret"),
/// )?
/// .with_trust_cert(true);
/// let session = descriptor.connect(&cancel).await?;
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    pub authentication: Authentication,
    /// Accept the server certificate without validation
    #[serde(default)]
    pub trust_cert: bool,
    /// Refuse on-premises servers without contained database authentication
    #[serde(default = "default_true")]
    pub require_contained: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(skip)]
    token_provider: Option<Arc<dyn TokenProvider>>,
}

impl ConnectionDescriptor {
    /// Create a descriptor with default port, timeout and options.
    pub fn new(
        host: impl Into<String>,
        database: impl Into<String>,
        authentication: Authentication,
    ) -> Result<Self> {
        let descriptor = Self {
            host: host.into(),
            port: DEFAULT_PORT,
            database: database.into(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            authentication,
            trust_cert: false,
            require_contained: true,
            pool_size: default_pool_size(),
            token_provider: None,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build a descriptor from flat key/value parameters.
    ///
    /// Recognised keys: `host`, `port`, `database`, `user`, `password`,
    /// `client_id`, `client_secret`, `tenant_id`, `user_identity`, `user_id`,
    /// `resource_id`, `connect_timeout_secs`, `trust_cert`,
    /// `require_contained`. The authentication method is chosen from the keys
    /// present: `user` selects SQL authentication, `client_id` a directory
    /// application, any managed identity key a managed identity, and nothing
    /// at all the default credential.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| params.get(key).filter(|v| !v.is_empty()).cloned();
        let flag = |key: &str| params.get(key).map(|v| v == "true" || v == "1");

        let authentication = if let Some(user) = get("user") {
            Authentication::local(user, get("password").unwrap_or_default())
        } else if let Some(client_id) = get("client_id") {
            Authentication::directory_application(
                client_id,
                get("client_secret").unwrap_or_default(),
                get("tenant_id"),
            )
        } else if flag("user_identity").is_some()
            || get("user_id").is_some()
            || get("resource_id").is_some()
        {
            Authentication::ManagedIdentity {
                user_identity: flag("user_identity").unwrap_or(false),
                user_id: get("user_id"),
                resource_id: get("resource_id"),
            }
        } else {
            Authentication::Default
        };

        let mut descriptor = Self::new(
            get("host").unwrap_or_default(),
            get("database").unwrap_or_default(),
            authentication,
        )?;

        if let Some(port) = get("port") {
            descriptor.port = port
                .parse()
                .map_err(|_| MssecError::Configuration(format!("invalid port '{}'", port)))?;
        }
        if let Some(secs) = get("connect_timeout_secs") {
            descriptor.connect_timeout_secs = secs.parse().map_err(|_| {
                MssecError::Configuration(format!("invalid connect timeout '{}'", secs))
            })?;
        }
        if let Some(trust) = flag("trust_cert") {
            descriptor.trust_cert = trust;
        }
        if let Some(require) = flag("require_contained") {
            descriptor.require_contained = require;
        }
        Ok(descriptor)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_trust_cert(mut self, trust: bool) -> Self {
        self.trust_cert = trust;
        self
    }

    pub fn with_require_contained(mut self, require: bool) -> Self {
        self.require_contained = require;
        self
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size.max(1);
        self
    }

    /// Source of access tokens for directory authentication
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    /// Effective connect timeout; zero means the 30 s default
    pub fn connect_timeout(&self) -> Duration {
        match self.connect_timeout_secs {
            0 => Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            secs => Duration::from_secs(secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(MssecError::validation("host cannot be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(MssecError::validation("database cannot be empty"));
        }
        self.authentication.validate()
    }

    /// Driver URL for this descriptor, secrets included.
    pub fn connection_url(&self) -> Result<Url> {
        let invalid =
            |what: &str| MssecError::Configuration(format!("invalid {} for driver URL", what));

        let mut url = Url::parse("sqlserver://localhost").map_err(|_| invalid("URL"))?;
        url.set_host(Some(&self.host)).map_err(|_| invalid("host"))?;
        url.set_port(Some(self.port)).map_err(|_| invalid("port"))?;

        if let Authentication::Local { user, password } = &self.authentication {
            url.set_username(user).map_err(|_| invalid("user"))?;
            url.set_password(Some(password))
                .map_err(|_| invalid("password"))?;
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("database", &self.database);
            query.append_pair("app name", APPLICATION_NAME);

            if let Some(fedauth) = self.authentication.fedauth() {
                query.append_pair("fedauth", fedauth);
            }
            match &self.authentication {
                Authentication::Local { .. } | Authentication::Default => {}
                Authentication::DirectoryApplication {
                    client_id,
                    client_secret,
                    tenant_id,
                    ..
                } => {
                    let user_id =
                        Authentication::service_principal_user_id(client_id, tenant_id.as_deref());
                    query.append_pair("user id", &user_id);
                    query.append_pair("password", client_secret);
                }
                Authentication::ManagedIdentity {
                    user_identity,
                    user_id,
                    resource_id,
                } => {
                    if *user_identity {
                        if let Some(user_id) = user_id {
                            query.append_pair("user id", user_id);
                        }
                        if let Some(resource_id) = resource_id {
                            query.append_pair("resource id", resource_id);
                        }
                    }
                }
            }
        }
        Ok(url)
    }

    /// Driver URL with userinfo and `password` removed, for logging
    pub fn redacted_url(&self) -> Result<String> {
        let mut url = self.connection_url()?;
        let _ = url.set_password(None);
        let _ = url.set_username("");
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "password" { "***".to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        url.query_pairs_mut().clear().extend_pairs(pairs);
        Ok(url.to_string())
    }

    /// tiberius configuration, without credentials
    pub(crate) fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.application_name(APPLICATION_NAME);
        config.encryption(EncryptionLevel::Required);
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }

    /// Open the pool, ping within the connect timeout and probe the server.
    #[tracing::instrument(skip(self, cancel), fields(host = %self.host, port = self.port, database = %self.database))]
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Session> {
        self.validate()?;
        let timeout = self.connect_timeout();
        if let Ok(url) = self.redacted_url() {
            tracing::debug!(url = %url, "connecting");
        }

        let manager = TiberiusConnectionManager::new(
            self.tiberius_config(),
            self.authentication.clone(),
            self.token_provider.clone(),
        );
        let options = PoolOptions {
            max_size: self.pool_size,
            connection_timeout: timeout,
        };
        let conn = MssqlConnection::open(manager, &options, self.database.clone()).await?;

        let pinged = cancellable(cancel, async {
            match tokio::time::timeout(timeout, conn.ping()).await {
                Ok(result) => result,
                Err(_) => Err(MssecError::Timeout(format!(
                    "no answer from {}:{} within {}s",
                    self.host,
                    self.port,
                    timeout.as_secs()
                ))),
            }
        })
        .await;
        if let Err(err) = pinged {
            return Err(err.during("connecting"));
        }

        let server = probe(&conn, &self.database, cancel)
            .await
            .map_err(|e| e.during("probing server"))?;
        check_topology(&server, self.require_contained)?;

        tracing::info!(
            is_azure = server.is_azure,
            contained_authentication = server.contained_authentication,
            default_language = %server.default_language,
            "connected"
        );
        Ok(Session::new(Arc::new(conn), server))
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("authentication", &self.authentication)
            .field("trust_cert", &self.trust_cert)
            .field("require_contained", &self.require_contained)
            .field("pool_size", &self.pool_size)
            .field("token_provider", &self.token_provider.is_some())
            .finish()
    }
}
