//! Authentication methods accepted by the connector

use serde::{Deserialize, Serialize};

use mssec_core::{MssecError, Result};

/// How the connector authenticates to the server.
///
/// Exactly one method applies to a descriptor; the driver URL and the
/// tiberius configuration are derived by matching on it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Authentication {
    /// SQL authentication with a user name and secret
    Local { user: String, password: String },

    /// Entra ID application (service principal)
    DirectoryApplication {
        client_id: String,
        client_secret: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tenant_id: Option<String>,
        /// Reserved for certificate credentials, which are not supported
        #[serde(default, skip_serializing_if = "Option::is_none")]
        certificate_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        certificate_password: Option<String>,
    },

    /// Managed identity of the host. System assigned unless `user_identity`.
    ManagedIdentity {
        #[serde(default)]
        user_identity: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_id: Option<String>,
    },

    /// Whatever credential the ambient environment provides
    Default,
}

impl Authentication {
    pub fn local(user: impl Into<String>, password: impl Into<String>) -> Self {
        Authentication::Local {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn directory_application(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tenant_id: Option<String>,
    ) -> Self {
        Authentication::DirectoryApplication {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tenant_id,
            certificate_path: None,
            certificate_password: None,
        }
    }

    pub fn system_managed_identity() -> Self {
        Authentication::ManagedIdentity {
            user_identity: false,
            user_id: None,
            resource_id: None,
        }
    }

    pub fn user_managed_identity(user_id: Option<String>, resource_id: Option<String>) -> Self {
        Authentication::ManagedIdentity {
            user_identity: true,
            user_id,
            resource_id,
        }
    }

    /// Value of the `fedauth` URL key, `None` for SQL authentication
    pub fn fedauth(&self) -> Option<&'static str> {
        match self {
            Authentication::Local { .. } => None,
            Authentication::DirectoryApplication { .. } => Some("ActiveDirectoryServicePrincipal"),
            Authentication::ManagedIdentity { .. } => Some("ActiveDirectoryManagedIdentity"),
            Authentication::Default => Some("ActiveDirectoryDefault"),
        }
    }

    /// Whether connecting requires an access token from a `TokenProvider`
    pub fn uses_token(&self) -> bool {
        !matches!(self, Authentication::Local { .. })
    }

    /// `user id` for a service principal: `clientId@tenantId`, or just the
    /// client id when no tenant is given
    pub fn service_principal_user_id(client_id: &str, tenant_id: Option<&str>) -> String {
        match tenant_id.filter(|t| !t.is_empty()) {
            Some(tenant) => format!("{}@{}", client_id, tenant),
            None => client_id.to_string(),
        }
    }

    /// Reject incomplete credentials before any network I/O
    pub fn validate(&self) -> Result<()> {
        match self {
            Authentication::Local { user, .. } => {
                if user.is_empty() {
                    return Err(MssecError::validation("user name cannot be empty"));
                }
            }
            Authentication::DirectoryApplication {
                client_id,
                client_secret,
                certificate_path,
                certificate_password,
                ..
            } => {
                if certificate_path.is_some() || certificate_password.is_some() {
                    return Err(MssecError::NotSupported(
                        "certificate credentials for directory applications".into(),
                    ));
                }
                if client_id.is_empty() {
                    return Err(MssecError::validation("client id cannot be empty"));
                }
                if client_secret.is_empty() {
                    return Err(MssecError::validation("client secret cannot be empty"));
                }
            }
            Authentication::ManagedIdentity { .. } | Authentication::Default => {}
        }
        Ok(())
    }
}

impl std::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Authentication::Local { user, .. } => f
                .debug_struct("Local")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Authentication::DirectoryApplication {
                client_id,
                tenant_id,
                ..
            } => f
                .debug_struct("DirectoryApplication")
                .field("client_id", client_id)
                .field("client_secret", &"***")
                .field("tenant_id", tenant_id)
                .finish(),
            Authentication::ManagedIdentity {
                user_identity,
                user_id,
                resource_id,
            } => f
                .debug_struct("ManagedIdentity")
                .field("user_identity", user_identity)
                .field("user_id", user_id)
                .field("resource_id", resource_id)
                .finish(),
            Authentication::Default => f.write_str("Default"),
        }
    }
}
