//! Server role service implementation

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use mssec_core::{CancellationToken, MssecError, Result, ResultExt, Row, Statement};

use crate::context::AdminContext;
use crate::ddl::DynamicSql;
use crate::member::RoleMember;
use crate::validate::{validate_principal_name, validate_role_name};

const SERVER_ROLE_COLUMNS: &str = "name, principal_id, type, type_desc, \
     owning_principal_id, is_fixed_role, create_date, modify_date";

const SERVER_PRINCIPAL_NAME_QUERY: &str =
    "SELECT name FROM sys.server_principals WHERE principal_id = @P1";

const SERVER_LOGIN_QUERY: &str = "SELECT name, principal_id, type_desc \
     FROM sys.server_principals WHERE name = @P1 AND type IN ('S', 'U', 'G', 'E', 'X', 'C', 'K')";

const SERVER_ROLE_MEMBERS_QUERY: &str = "SELECT m.name, m.principal_id, m.type_desc \
     FROM sys.server_role_members rm \
     JOIN sys.server_principals r ON r.principal_id = rm.role_principal_id \
     JOIN sys.server_principals m ON m.principal_id = rm.member_principal_id \
     WHERE r.name = @P1 ORDER BY m.name";

/// Owner used when a role is created without one (`sa`)
pub const DEFAULT_OWNER_PRINCIPAL_ID: i32 = 1;

/// The role every login belongs to; it can never be dropped
pub const PUBLIC_ROLE: &str = "public";

/// A server role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRole {
    pub name: String,
    #[serde(default)]
    pub principal_id: i32,
    #[serde(default)]
    pub type_code: String,
    #[serde(default)]
    pub type_desc: String,
    /// 0 means "use the default owner"
    #[serde(default)]
    pub owning_principal_id: i32,
    #[serde(default)]
    pub is_fixed_role: bool,
    #[serde(default)]
    pub create_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub modify_date: Option<NaiveDateTime>,
}

impl ServerRole {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_owner(mut self, principal_id: i32) -> Self {
        self.owning_principal_id = principal_id;
        self
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.string("name")?,
            principal_id: row.i32("principal_id")?,
            type_code: row.string("type")?.trim().to_string(),
            type_desc: row.string("type_desc")?,
            owning_principal_id: row.i32("owning_principal_id")?,
            is_fixed_role: row.bool("is_fixed_role")?,
            create_date: row.datetime("create_date"),
            modify_date: row.datetime("modify_date"),
        })
    }
}

fn membership_statement(role: &str, member: &str, add: bool) -> Statement {
    DynamicSql::new()
        .text("ALTER SERVER ROLE ")
        .identifier("role", role)
        .text(if add { " ADD MEMBER " } else { " DROP MEMBER " })
        .identifier("member", member)
        .build()
}

/// Server role operations, available through [`AdminContext::server_roles`]
pub struct ServerRoleService<'a> {
    ctx: &'a AdminContext,
}

impl<'a> ServerRoleService<'a> {
    pub(crate) fn new(ctx: &'a AdminContext) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(&self, name: &str, cancel: &CancellationToken) -> Result<ServerRole> {
        self.read_role(name, cancel).await.during("get server role")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<ServerRole>> {
        self.list_roles(cancel).await.during("list server roles")
    }

    /// Create a role owned by `role.owning_principal_id`, or by principal 1
    /// when unset. `role` itself is left untouched.
    #[tracing::instrument(skip(self, role, cancel), fields(role = %role.name))]
    pub async fn create(&self, role: &ServerRole, cancel: &CancellationToken) -> Result<()> {
        self.create_role(role, cancel).await.during("create server role")
    }

    /// Drop a role after removing its members. `public` and fixed roles are
    /// skipped.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn drop(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.drop_role(name, cancel).await.during("drop server role")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn add_member(&self, role: &str, login: &str, cancel: &CancellationToken) -> Result<()> {
        self.change_members(role, &[login], true, cancel)
            .await
            .during("add server role member")
    }

    /// Add several logins, one statement each, stopping at the first failure
    #[tracing::instrument(skip(self, logins, cancel), fields(count = logins.len()))]
    pub async fn add_members<S: AsRef<str>>(
        &self,
        role: &str,
        logins: &[S],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.change_members(role, logins, true, cancel)
            .await
            .during("add server role members")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn remove_member(&self, role: &str, login: &str, cancel: &CancellationToken) -> Result<()> {
        self.change_members(role, &[login], false, cancel)
            .await
            .during("remove server role member")
    }

    #[tracing::instrument(skip(self, logins, cancel), fields(count = logins.len()))]
    pub async fn remove_members<S: AsRef<str>>(
        &self,
        role: &str,
        logins: &[S],
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.change_members(role, logins, false, cancel)
            .await
            .during("remove server role members")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        self.list_members(role, cancel).await.during("list server role members")
    }

    async fn read_role(&self, name: &str, cancel: &CancellationToken) -> Result<ServerRole> {
        validate_role_name(name)?;
        self.ctx.require_master("reading server roles")?;
        self.ctx.ready(cancel).await?;
        self.fetch(name, cancel).await
    }

    async fn fetch(&self, name: &str, cancel: &CancellationToken) -> Result<ServerRole> {
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.server_principals WHERE type_desc = 'SERVER_ROLE' AND name = @P1",
            SERVER_ROLE_COLUMNS
        ))
        .bind(name);
        let row = self
            .ctx
            .query(&statement, cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| MssecError::not_found(format!("server role '{}'", name)))?;
        ServerRole::from_row(&row)
    }

    async fn fetch_login(&self, name: &str, cancel: &CancellationToken) -> Result<RoleMember> {
        let statement = Statement::new(SERVER_LOGIN_QUERY).bind(name);
        let row = self
            .ctx
            .query(&statement, cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| MssecError::not_found(format!("login '{}'", name)))?;
        RoleMember::from_row(&row)
    }

    async fn fetch_members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        let result = self
            .ctx
            .query(&Statement::new(SERVER_ROLE_MEMBERS_QUERY).bind(role), cancel)
            .await?;
        result.rows.iter().map(RoleMember::from_row).collect()
    }

    async fn list_roles(&self, cancel: &CancellationToken) -> Result<Vec<ServerRole>> {
        self.ctx.require_master("reading server roles")?;
        self.ctx.ready(cancel).await?;
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.server_principals WHERE type_desc = 'SERVER_ROLE' ORDER BY name",
            SERVER_ROLE_COLUMNS
        ));
        let result = self.ctx.query(&statement, cancel).await?;
        result.rows.iter().map(ServerRole::from_row).collect()
    }

    async fn create_role(&self, role: &ServerRole, cancel: &CancellationToken) -> Result<()> {
        validate_role_name(&role.name)?;
        self.ctx.require_master("creating server roles")?;
        self.ctx.forbid_azure("creating server roles")?;

        let mut role = role.clone();
        if role.owning_principal_id == 0 {
            role.owning_principal_id = DEFAULT_OWNER_PRINCIPAL_ID;
        }

        self.ctx.ready(cancel).await?;
        let owner = self
            .ctx
            .query(
                &Statement::new(SERVER_PRINCIPAL_NAME_QUERY).bind(role.owning_principal_id),
                cancel,
            )
            .await?
            .into_first_row()
            .ok_or_else(|| {
                MssecError::not_found(format!(
                    "server principal with id {}",
                    role.owning_principal_id
                ))
            })?
            .string("name")?;

        let statement = DynamicSql::new()
            .text("CREATE SERVER ROLE ")
            .identifier("role", role.name.as_str())
            .text(" AUTHORIZATION ")
            .identifier("owner", owner)
            .build();
        self.ctx.execute(&statement, cancel).await
    }

    async fn drop_role(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        validate_role_name(name)?;
        self.ctx.require_master("dropping server roles")?;
        self.ctx.forbid_azure("dropping server roles")?;
        if name.eq_ignore_ascii_case(PUBLIC_ROLE) {
            tracing::debug!("public role is never dropped");
            return Ok(());
        }

        self.ctx.ready(cancel).await?;
        let role = self.fetch(name, cancel).await?;
        if role.is_fixed_role {
            tracing::debug!(role = %role.name, "fixed server role is never dropped");
            return Ok(());
        }

        // DROP SERVER ROLE fails while the role still has members
        for member in self.fetch_members(&role.name, cancel).await? {
            self.ctx
                .execute(&membership_statement(&role.name, &member.name, false), cancel)
                .await?;
        }
        let statement = DynamicSql::new()
            .text("DROP SERVER ROLE ")
            .identifier("role", role.name.as_str())
            .build();
        self.ctx.execute(&statement, cancel).await
    }

    async fn change_members<S: AsRef<str>>(
        &self,
        role: &str,
        logins: &[S],
        add: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_role_name(role)?;
        for login in logins {
            validate_principal_name("login", login.as_ref())?;
        }
        self.ctx.require_master("changing server role members")?;
        self.ctx.forbid_azure("changing server role members")?;

        self.ctx.ready(cancel).await?;
        let role = self.fetch(role, cancel).await?;
        for login in logins {
            let login = self.fetch_login(login.as_ref(), cancel).await?;
            self.ctx
                .execute(&membership_statement(&role.name, &login.name, add), cancel)
                .await?;
        }
        Ok(())
    }

    async fn list_members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        validate_role_name(role)?;
        self.ctx.require_master("reading server role members")?;
        self.ctx.ready(cancel).await?;
        let role = self.fetch(role, cancel).await?;
        self.fetch_members(&role.name, cancel).await
    }
}
