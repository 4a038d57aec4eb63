//! Identifier, permission-name and permission-state validation
//!
//! These checks run before any round trip. Values that pass them are wrapped
//! in [`SqlIdentifier`] / [`PermissionName`], the only types the DDL builder
//! accepts as unquoted tokens.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mssec_core::{MssecError, Result};

/// Longest identifier SQL Server accepts (`sysname`)
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"));

static PERMISSION_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z ]*[A-Z]$").expect("valid regex"));

/// Check a name that may be written unquoted into DDL.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MssecError::validation("SQL identifier cannot be empty"));
    }
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(MssecError::validation("SQL identifier too long"));
    }
    if !IDENTIFIER_REGEX.is_match(name) {
        return Err(MssecError::validation("invalid SQL identifier format"));
    }
    Ok(())
}

/// Role names follow the identifier rules once known to be non-empty.
pub fn validate_role_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MssecError::validation("role name cannot be empty"));
    }
    validate_identifier(name)
}

pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MssecError::validation("schema name cannot be empty"));
    }
    validate_identifier(name)
}

/// Permission names are upper-case words separated by single spaces,
/// e.g. `SELECT` or `VIEW DEFINITION`. Single-letter names are rejected.
pub fn validate_permission_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MssecError::validation("permission name cannot be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(MssecError::validation("permission name too long"));
    }
    if !PERMISSION_NAME_REGEX.is_match(name) {
        return Err(MssecError::validation("invalid permission name format"));
    }
    Ok(())
}

/// Logins and users only ever reach DDL through `QUOTENAME`, so any
/// non-empty `sysname` is acceptable.
pub fn validate_principal_name(kind: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(MssecError::validation(format!("{} name cannot be empty", kind)));
    }
    if name.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(MssecError::validation(format!("{} name too long", kind)));
    }
    Ok(())
}

/// Directory object ids are GUIDs
pub fn validate_object_id(object_id: &str) -> Result<Uuid> {
    Uuid::parse_str(object_id)
        .map_err(|_| MssecError::validation(format!("invalid object id '{}'", object_id)))
}

/// A name that passed [`validate_identifier`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlIdentifier(String);

impl SqlIdentifier {
    pub fn parse(name: &str) -> Result<Self> {
        validate_identifier(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn schema(name: &str) -> Result<Self> {
        validate_schema_name(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A name that passed [`validate_permission_name`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionName(String);

impl PermissionName {
    pub fn parse(name: &str) -> Result<Self> {
        validate_permission_name(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The three permission statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PermissionVerb {
    Grant,
    Deny,
    Revoke,
}

impl PermissionVerb {
    pub fn as_sql(&self) -> &'static str {
        match self {
            PermissionVerb::Grant => "GRANT",
            PermissionVerb::Deny => "DENY",
            PermissionVerb::Revoke => "REVOKE",
        }
    }

    /// Preposition in front of the grantee
    pub fn grantee_keyword(&self) -> &'static str {
        match self {
            PermissionVerb::Grant | PermissionVerb::Deny => "TO",
            PermissionVerb::Revoke => "FROM",
        }
    }
}

impl std::fmt::Display for PermissionVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Turn a catalog-style permission state into a verb.
///
/// `state` is `""`, `"G"` or `"D"`; `state_desc` is `""`, `"GRANT"` or
/// `"DENY"`. Anything else fails with "invalid state value". When both are
/// set and disagree, `state` wins; when both are empty the verb is GRANT.
pub fn normalize_state(state: &str, state_desc: &str) -> Result<PermissionVerb> {
    let from_state = match state {
        "" => None,
        "G" => Some(PermissionVerb::Grant),
        "D" => Some(PermissionVerb::Deny),
        _ => return Err(MssecError::validation("invalid state value")),
    };
    let from_desc = match state_desc {
        "" => None,
        "GRANT" => Some(PermissionVerb::Grant),
        "DENY" => Some(PermissionVerb::Deny),
        _ => return Err(MssecError::validation("invalid state value")),
    };
    Ok(from_state.or(from_desc).unwrap_or(PermissionVerb::Grant))
}
