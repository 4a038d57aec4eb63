//! Permission service implementation

use serde::{Deserialize, Serialize};

use mssec_core::{CancellationToken, MssecError, Result, ResultExt, Row, Statement};

use crate::context::AdminContext;
use crate::ddl::DynamicSql;
use crate::validate::{
    PermissionName, PermissionVerb, SqlIdentifier, normalize_state, validate_role_name,
};

const PERMISSION_COLUMNS: &str = "p.permission_name, p.state, p.state_desc, p.class, \
     p.class_desc, p.major_id, p.minor_id, p.grantee_principal_id, \
     p.grantor_principal_id, RTRIM(p.type) AS type";

/// Where a permission applies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionScope {
    /// Database-wide (`sys.database_permissions` class 0)
    #[default]
    Database,
    /// `ON SCHEMA::<name>` (class 3)
    Schema(String),
}

impl PermissionScope {
    pub fn schema(name: impl Into<String>) -> Self {
        PermissionScope::Schema(name.into())
    }

    fn validated_schema(&self) -> Result<Option<SqlIdentifier>> {
        match self {
            PermissionScope::Database => Ok(None),
            PermissionScope::Schema(name) => SqlIdentifier::schema(name).map(Some),
        }
    }
}

/// A row of `sys.database_permissions`, or a directive to apply one
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub permission_name: String,
    /// `G`, `D` or empty
    #[serde(default)]
    pub state: String,
    /// `GRANT`, `DENY` or empty
    #[serde(default)]
    pub state_desc: String,
    #[serde(default)]
    pub class: i32,
    #[serde(default)]
    pub class_desc: String,
    #[serde(default)]
    pub major_id: i32,
    #[serde(default)]
    pub minor_id: i32,
    #[serde(default)]
    pub grantee_principal_id: i32,
    #[serde(default)]
    pub grantor_principal_id: i32,
    #[serde(default)]
    pub type_code: String,
}

impl Permission {
    pub fn new(permission_name: impl Into<String>) -> Self {
        Self {
            permission_name: permission_name.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_state_desc(mut self, state_desc: impl Into<String>) -> Self {
        self.state_desc = state_desc.into();
        self
    }

    /// GRANT or DENY, from `state` / `state_desc`
    pub fn verb(&self) -> Result<PermissionVerb> {
        normalize_state(&self.state, &self.state_desc)
    }

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            permission_name: row.string("permission_name")?,
            state: row.string("state")?,
            state_desc: row.string("state_desc")?,
            class: row.i32("class")?,
            class_desc: row.string("class_desc")?,
            major_id: row.i32("major_id")?,
            minor_id: row.i32("minor_id")?,
            grantee_principal_id: row.i32("grantee_principal_id")?,
            grantor_principal_id: row.i32("grantor_principal_id")?,
            type_code: row.string("type")?,
        })
    }
}

/// Build `<VERB> <PERMISSION>[ ON SCHEMA::[schema]] TO|FROM QUOTENAME(role)`.
///
/// The role travels as a parameter; the permission and schema are validated
/// and written as text.
pub fn build_permission_statement(
    role: &str,
    permission: &str,
    verb: PermissionVerb,
    scope: &PermissionScope,
) -> Result<Statement> {
    validate_role_name(role)?;
    let permission = PermissionName::parse(permission)?;
    let schema = scope.validated_schema()?;

    let mut sql = DynamicSql::new()
        .text(verb.as_sql())
        .text(" ")
        .permission(&permission);
    if let Some(schema) = &schema {
        sql = sql.text(" ON SCHEMA::").raw_identifier(schema);
    }
    Ok(sql
        .text(" ")
        .text(verb.grantee_keyword())
        .text(" ")
        .identifier("role", role)
        .build())
}

fn build_many<S: AsRef<str>>(
    role: &str,
    permissions: &[S],
    verb: PermissionVerb,
    scope: &PermissionScope,
) -> Result<Vec<Statement>> {
    permissions
        .iter()
        .map(|permission| build_permission_statement(role, permission.as_ref(), verb, scope))
        .collect()
}

fn permissions_query(role: &str, scope: &PermissionScope, permission: Option<&str>) -> Statement {
    let mut statement = match scope {
        PermissionScope::Database => Statement::new(format!(
            "SELECT {} FROM sys.database_permissions p \
             WHERE p.grantee_principal_id = DATABASE_PRINCIPAL_ID(@P1) AND p.class = 0",
            PERMISSION_COLUMNS
        ))
        .bind(role),
        PermissionScope::Schema(schema) => Statement::new(format!(
            "SELECT {} FROM sys.database_permissions p \
             JOIN sys.schemas s ON s.schema_id = p.major_id \
             WHERE p.grantee_principal_id = DATABASE_PRINCIPAL_ID(@P1) AND p.class = 3 \
             AND s.name = @P2",
            PERMISSION_COLUMNS
        ))
        .bind(role)
        .bind(schema.as_str()),
    };
    if let Some(permission) = permission {
        statement.sql.push_str(&format!(
            " AND p.permission_name = @P{}",
            statement.params.len() + 1
        ));
        statement = statement.bind(permission);
    }
    statement.sql.push_str(" ORDER BY p.permission_name");
    statement
}

/// Permission operations on database roles, available through
/// [`AdminContext::permissions`]
pub struct PermissionService<'a> {
    ctx: &'a AdminContext,
}

impl<'a> PermissionService<'a> {
    pub(crate) fn new(ctx: &'a AdminContext) -> Self {
        Self { ctx }
    }

    // ========================================================================
    // Single permission
    // ========================================================================

    #[tracing::instrument(skip(self, cancel))]
    pub async fn assign(
        &self,
        role: &str,
        permission: &str,
        verb: PermissionVerb,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_one(role, permission, verb, scope, cancel)
            .await
            .during("assign permission")
    }

    /// Apply `permission` with the verb its state normalizes to
    #[tracing::instrument(skip(self, permission, cancel), fields(permission = %permission.permission_name))]
    pub async fn apply(
        &self,
        role: &str,
        permission: &Permission,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.apply_one(role, permission, scope, cancel)
            .await
            .during("apply permission")
    }

    pub async fn grant(
        &self,
        role: &str,
        permission: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign(role, permission, PermissionVerb::Grant, scope, cancel)
            .await
    }

    pub async fn deny(
        &self,
        role: &str,
        permission: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign(role, permission, PermissionVerb::Deny, scope, cancel)
            .await
    }

    pub async fn revoke(
        &self,
        role: &str,
        permission: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign(role, permission, PermissionVerb::Revoke, scope, cancel)
            .await
    }

    // ========================================================================
    // Bulk, statement by statement
    // ========================================================================

    /// Run one statement per permission, in order. Every statement is
    /// composed before the first one runs; a failure stops the batch and
    /// leaves earlier statements applied.
    #[tracing::instrument(skip(self, permissions, cancel), fields(count = permissions.len()))]
    pub async fn assign_many<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        verb: PermissionVerb,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statements = build_many(role, permissions, verb, scope).during("assign permissions")?;
        self.run_sequential(statements, cancel)
            .await
            .during("assign permissions")
    }

    #[tracing::instrument(skip(self, permissions, cancel), fields(count = permissions.len()))]
    pub async fn apply_many(
        &self,
        role: &str,
        permissions: &[Permission],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statements = self
            .build_applied(role, permissions, scope)
            .during("apply permissions")?;
        self.run_sequential(statements, cancel)
            .await
            .during("apply permissions")
    }

    pub async fn grant_many<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many(role, permissions, PermissionVerb::Grant, scope, cancel)
            .await
    }

    pub async fn deny_many<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many(role, permissions, PermissionVerb::Deny, scope, cancel)
            .await
    }

    pub async fn revoke_many<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many(role, permissions, PermissionVerb::Revoke, scope, cancel)
            .await
    }

    // ========================================================================
    // Bulk, in one transaction
    // ========================================================================

    /// Like [`Self::assign_many`], but all statements commit together or not
    /// at all
    #[tracing::instrument(skip(self, permissions, cancel), fields(count = permissions.len()))]
    pub async fn assign_many_atomic<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        verb: PermissionVerb,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statements =
            build_many(role, permissions, verb, scope).during("assign permissions atomically")?;
        self.run_atomic(statements, cancel)
            .await
            .during("assign permissions atomically")
    }

    #[tracing::instrument(skip(self, permissions, cancel), fields(count = permissions.len()))]
    pub async fn apply_many_atomic(
        &self,
        role: &str,
        permissions: &[Permission],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statements = self
            .build_applied(role, permissions, scope)
            .during("apply permissions atomically")?;
        self.run_atomic(statements, cancel)
            .await
            .during("apply permissions atomically")
    }

    pub async fn grant_many_atomic<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many_atomic(role, permissions, PermissionVerb::Grant, scope, cancel)
            .await
    }

    pub async fn deny_many_atomic<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many_atomic(role, permissions, PermissionVerb::Deny, scope, cancel)
            .await
    }

    pub async fn revoke_many_atomic<S: AsRef<str>>(
        &self,
        role: &str,
        permissions: &[S],
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.assign_many_atomic(role, permissions, PermissionVerb::Revoke, scope, cancel)
            .await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Every permission recorded for `role` at `scope`
    #[tracing::instrument(skip(self, cancel))]
    pub async fn list(
        &self,
        role: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<Vec<Permission>> {
        self.read(role, scope, None, cancel)
            .await
            .during("list permissions")
    }

    /// The recorded `permission` of `role` at `scope`; not found when the
    /// role holds no such grant or deny
    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        role: &str,
        permission: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<Permission> {
        self.read_one(role, permission, scope, cancel)
            .await
            .during("get permission")
    }

    fn build_applied(
        &self,
        role: &str,
        permissions: &[Permission],
        scope: &PermissionScope,
    ) -> Result<Vec<Statement>> {
        permissions
            .iter()
            .map(|permission| {
                let verb = permission.verb()?;
                build_permission_statement(role, &permission.permission_name, verb, scope)
            })
            .collect()
    }

    async fn run_one(
        &self,
        role: &str,
        permission: &str,
        verb: PermissionVerb,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let statement = build_permission_statement(role, permission, verb, scope)?;
        self.ctx.ready(cancel).await?;
        self.ctx.execute(&statement, cancel).await
    }

    async fn apply_one(
        &self,
        role: &str,
        permission: &Permission,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let verb = permission.verb()?;
        self.run_one(role, &permission.permission_name, verb, scope, cancel)
            .await
    }

    async fn run_sequential(
        &self,
        statements: Vec<Statement>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        self.ctx.ready(cancel).await?;
        for statement in &statements {
            self.ctx.execute(statement, cancel).await?;
        }
        Ok(())
    }

    async fn run_atomic(&self, statements: Vec<Statement>, cancel: &CancellationToken) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        self.ctx.ready(cancel).await?;
        self.ctx.execute_atomic(statements, cancel).await
    }

    async fn read(
        &self,
        role: &str,
        scope: &PermissionScope,
        permission: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Permission>> {
        validate_role_name(role)?;
        scope.validated_schema()?;
        if let Some(permission) = permission {
            PermissionName::parse(permission)?;
        }

        self.ctx.ready(cancel).await?;
        let result = self
            .ctx
            .query(&permissions_query(role, scope, permission), cancel)
            .await?;
        result.rows.iter().map(Permission::from_row).collect()
    }

    async fn read_one(
        &self,
        role: &str,
        permission: &str,
        scope: &PermissionScope,
        cancel: &CancellationToken,
    ) -> Result<Permission> {
        self.read(role, scope, Some(permission), cancel)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                MssecError::not_found(format!(
                    "permission {} for role '{}'",
                    permission, role
                ))
            })
    }
}
