//! Role membership rows shared by server and database roles

use serde::{Deserialize, Serialize};

use mssec_core::{Result, Row};

/// A principal that belongs to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMember {
    pub name: String,
    pub principal_id: i32,
    /// e.g. `SQL_LOGIN`, `SQL_USER`, `DATABASE_ROLE`
    pub type_desc: String,
}

impl RoleMember {
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.string("name")?,
            principal_id: row.i32("principal_id")?,
            type_desc: row.string("type_desc")?,
        })
    }
}
