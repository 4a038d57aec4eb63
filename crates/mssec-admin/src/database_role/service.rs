//! Database role service implementation

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use mssec_core::{CancellationToken, MssecError, Result, ResultExt, Row, Statement};

use crate::context::AdminContext;
use crate::ddl::DynamicSql;
use crate::member::RoleMember;
use crate::validate::{validate_principal_name, validate_role_name};

const ROLE_COLUMNS: &str =
    "name, principal_id, owning_principal_id, is_fixed_role, create_date, modify_date";

const PRINCIPAL_NAME_QUERY: &str =
    "SELECT name FROM sys.database_principals WHERE principal_id = @P1";

const MEMBER_PRINCIPAL_QUERY: &str = "SELECT name, principal_id, type_desc \
     FROM sys.database_principals WHERE name = @P1 AND type IN ('S', 'U', 'G', 'E', 'X', 'R')";

const ROLE_MEMBERS_QUERY: &str = "SELECT m.name, m.principal_id, m.type_desc \
     FROM sys.database_role_members rm \
     JOIN sys.database_principals r ON r.principal_id = rm.role_principal_id \
     JOIN sys.database_principals m ON m.principal_id = rm.member_principal_id \
     WHERE r.name = @P1 ORDER BY m.name";

/// `dbo`
pub const DEFAULT_ROLE_OWNER_ID: i32 = 1;

/// A role of the connected database
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseRole {
    pub name: String,
    #[serde(default)]
    pub principal_id: i32,
    /// 0 means [`DEFAULT_ROLE_OWNER_ID`]
    #[serde(default)]
    pub owning_principal_id: i32,
    #[serde(default)]
    pub is_fixed_role: bool,
    #[serde(default)]
    pub create_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub modify_date: Option<NaiveDateTime>,
}

impl DatabaseRole {
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
            owning_principal_id: row.i32("owning_principal_id")?,
            is_fixed_role: row.bool("is_fixed_role")?,
            create_date: row.datetime("create_date"),
            modify_date: row.datetime("modify_date"),
        })
    }
}

fn membership_statement(role: &str, member: &str, add: bool) -> Statement {
    DynamicSql::new()
        .text("ALTER ROLE ")
        .identifier("role", role)
        .text(if add { " ADD MEMBER " } else { " DROP MEMBER " })
        .identifier("member", member)
        .build()
}

/// Database role operations, available through
/// [`AdminContext::database_roles`]
pub struct DatabaseRoleService<'a> {
    ctx: &'a AdminContext,
}

impl<'a> DatabaseRoleService<'a> {
    pub(crate) fn new(ctx: &'a AdminContext) -> Self {
        Self { ctx }
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseRole> {
        self.read_role(name, cancel).await.during("get database role")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<DatabaseRole>> {
        self.list_roles(cancel).await.during("list database roles")
    }

    /// Create a role; an unset owner becomes `dbo` on a copy of `role`
    #[tracing::instrument(skip(self, role, cancel), fields(role = %role.name))]
    pub async fn create(&self, role: &DatabaseRole, cancel: &CancellationToken) -> Result<()> {
        self.create_role(role, cancel).await.during("create database role")
    }

    /// Rename `name` to `desired.name` and move ownership to
    /// `desired.owning_principal_id`, in one transaction. Unchanged fields
    /// produce no DDL.
    #[tracing::instrument(skip(self, desired, cancel))]
    pub async fn update(
        &self,
        name: &str,
        desired: &DatabaseRole,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.update_role(name, desired, cancel)
            .await
            .during("update database role")
    }

    /// Remove every member, then drop the role, in one transaction
    #[tracing::instrument(skip(self, cancel))]
    pub async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.delete_role(name, cancel).await.during("delete database role")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn add_member(&self, role: &str, member: &str, cancel: &CancellationToken) -> Result<()> {
        self.change_member(role, member, true, cancel)
            .await
            .during("add database role member")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn remove_member(&self, role: &str, member: &str, cancel: &CancellationToken) -> Result<()> {
        self.change_member(role, member, false, cancel)
            .await
            .during("remove database role member")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        self.list_members(role, cancel)
            .await
            .during("list database role members")
    }

    async fn fetch(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseRole> {
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.database_principals WHERE type = 'R' AND name = @P1",
            ROLE_COLUMNS
        ))
        .bind(name);
        let row = self
            .ctx
            .query(&statement, cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| MssecError::not_found(format!("database role '{}'", name)))?;
        DatabaseRole::from_row(&row)
    }

    async fn principal_name(&self, principal_id: i32, cancel: &CancellationToken) -> Result<String> {
        self.ctx
            .query(&Statement::new(PRINCIPAL_NAME_QUERY).bind(principal_id), cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| {
                MssecError::not_found(format!("database principal with id {}", principal_id))
            })?
            .string("name")
    }

    async fn fetch_members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        let result = self
            .ctx
            .query(&Statement::new(ROLE_MEMBERS_QUERY).bind(role), cancel)
            .await?;
        result.rows.iter().map(RoleMember::from_row).collect()
    }

    async fn read_role(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseRole> {
        validate_role_name(name)?;
        self.ctx.ready(cancel).await?;
        self.fetch(name, cancel).await
    }

    async fn list_roles(&self, cancel: &CancellationToken) -> Result<Vec<DatabaseRole>> {
        self.ctx.ready(cancel).await?;
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.database_principals WHERE type = 'R' ORDER BY name",
            ROLE_COLUMNS
        ));
        let result = self.ctx.query(&statement, cancel).await?;
        result.rows.iter().map(DatabaseRole::from_row).collect()
    }

    async fn create_role(&self, role: &DatabaseRole, cancel: &CancellationToken) -> Result<()> {
        validate_role_name(&role.name)?;
        let mut role = role.clone();
        if role.owning_principal_id == 0 {
            role.owning_principal_id = DEFAULT_ROLE_OWNER_ID;
        }

        self.ctx.ready(cancel).await?;
        let owner = self.principal_name(role.owning_principal_id, cancel).await?;
        let statement = DynamicSql::new()
            .text("CREATE ROLE ")
            .identifier("role", role.name.as_str())
            .text(" AUTHORIZATION ")
            .identifier("owner", owner)
            .build();
        self.ctx.execute(&statement, cancel).await
    }

    async fn update_role(
        &self,
        name: &str,
        desired: &DatabaseRole,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_role_name(name)?;
        validate_role_name(&desired.name)?;

        self.ctx.ready(cancel).await?;
        let current = self.fetch(name, cancel).await?;

        let mut statements = Vec::new();
        if desired.name != current.name {
            statements.push(
                DynamicSql::new()
                    .text("ALTER ROLE ")
                    .identifier("role", current.name.as_str())
                    .text(" WITH NAME = ")
                    .identifier("new_name", desired.name.as_str())
                    .build(),
            );
        }
        if desired.owning_principal_id != 0
            && desired.owning_principal_id != current.owning_principal_id
        {
            let owner = self.principal_name(desired.owning_principal_id, cancel).await?;
            statements.push(
                DynamicSql::new()
                    .text("ALTER AUTHORIZATION ON ROLE::")
                    .identifier("role", desired.name.as_str())
                    .text(" TO ")
                    .identifier("owner", owner)
                    .build(),
            );
        }

        if statements.is_empty() {
            tracing::debug!("database role unchanged");
            return Ok(());
        }
        self.ctx.execute_atomic(statements, cancel).await
    }

    async fn delete_role(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        validate_role_name(name)?;
        self.ctx.ready(cancel).await?;
        let role = self.fetch(name, cancel).await?;
        if role.is_fixed_role {
            return Err(MssecError::validation(format!(
                "fixed database role '{}' cannot be deleted",
                role.name
            )));
        }

        let mut statements: Vec<Statement> = self
            .fetch_members(&role.name, cancel)
            .await?
            .iter()
            .map(|member| membership_statement(&role.name, &member.name, false))
            .collect();
        statements.push(
            DynamicSql::new()
                .text("DROP ROLE ")
                .identifier("role", role.name.as_str())
                .build(),
        );
        self.ctx.execute_atomic(statements, cancel).await
    }

    async fn change_member(
        &self,
        role: &str,
        member: &str,
        add: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        validate_role_name(role)?;
        validate_principal_name("member", member)?;

        self.ctx.ready(cancel).await?;
        let role = self.fetch(role, cancel).await?;
        let member = self
            .ctx
            .query(&Statement::new(MEMBER_PRINCIPAL_QUERY).bind(member), cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| MssecError::not_found(format!("database principal '{}'", member)))?
            .string("name")?;
        self.ctx
            .execute(&membership_statement(&role.name, &member, add), cancel)
            .await
    }

    async fn list_members(&self, role: &str, cancel: &CancellationToken) -> Result<Vec<RoleMember>> {
        validate_role_name(role)?;
        self.ctx.ready(cancel).await?;
        let role = self.fetch(role, cancel).await?;
        self.fetch_members(&role.name, cancel).await
    }
}
