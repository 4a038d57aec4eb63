//! Database user service implementation
//!
//! A database user is one of four mutually exclusive flavors depending on
//! whether it is backed by a directory identity and whether it is contained
//! in the database or mapped to a server login. See [`UserFlavor`].

use serde::{Deserialize, Serialize};

use mssec_core::{CancellationToken, MssecError, Result, ResultExt, Row, ServerInfo, Statement};

use crate::context::AdminContext;
use crate::ddl::{DynamicSql, list_separator};
use crate::validate::{validate_object_id, validate_principal_name, validate_schema_name};

/// Schema assigned when none is requested
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Language keyword meaning "use the database default"
pub const LANGUAGE_NONE: &str = "NONE";

const USER_COLUMNS: &str = "dp.name, dp.principal_id, dp.type, dp.authentication_type_desc, \
     ISNULL(dp.default_schema_name, N'') AS default_schema_name, \
     ISNULL(dp.default_language_name, N'') AS default_language_name, \
     ISNULL(SUSER_SNAME(dp.sid), N'') AS login_name, \
     CASE WHEN dp.type IN ('E', 'X') THEN LOWER(CONVERT(NVARCHAR(36), CAST(dp.sid AS UNIQUEIDENTIFIER))) ELSE N'' END AS object_id, \
     ISNULL(CONVERT(NVARCHAR(172), dp.sid, 1), N'') AS sid";

const USER_TYPES: &str = "dp.type IN ('S', 'U', 'G', 'E', 'X')";

/// The four ways a database user can be authenticated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserFlavor {
    /// Directory identity authenticated by the database itself
    ContainedDirectory,
    /// Directory identity mapped to a server login
    LoginDirectory,
    /// Password stored in the database
    ContainedSql,
    /// Mapped to a SQL-authenticated server login
    LoginSql,
}

/// A database user
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseUser {
    pub name: String,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub external: bool,
    #[serde(default)]
    pub contained: bool,
    /// Server login backing a non-contained user
    #[serde(default)]
    pub login_name: String,
    /// Empty means [`DEFAULT_SCHEMA`]
    #[serde(default)]
    pub default_schema: String,
    #[serde(default)]
    pub default_language: String,
    /// Directory object id of an external user
    #[serde(default)]
    pub object_id: String,
    #[serde(default)]
    pub sid: String,
    #[serde(default)]
    pub principal_id: i32,
}

impl DatabaseUser {
    /// A user with a password stored in the database
    pub fn contained_sql(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: Some(password.into()),
            contained: true,
            ..Default::default()
        }
    }

    /// A directory user authenticated by the database
    pub fn contained_directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external: true,
            contained: true,
            ..Default::default()
        }
    }

    /// A user mapped to a server login
    pub fn for_login(name: impl Into<String>, login_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            login_name: login_name.into(),
            ..Default::default()
        }
    }

    pub fn with_external(mut self, external: bool) -> Self {
        self.external = external;
        self
    }

    pub fn with_object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = object_id.into();
        self
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = schema.into();
        self
    }

    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn flavor(&self) -> UserFlavor {
        match (self.external, self.contained) {
            (true, true) => UserFlavor::ContainedDirectory,
            (true, false) => UserFlavor::LoginDirectory,
            (false, true) => UserFlavor::ContainedSql,
            (false, false) => UserFlavor::LoginSql,
        }
    }

    /// Check the principal invariants against the connected server.
    ///
    /// Runs without any round trip.
    pub fn validate(&self, server: &ServerInfo) -> Result<()> {
        validate_principal_name("user", &self.name)?;

        if self.contained && !self.login_name.is_empty() {
            return Err(MssecError::validation(
                "contained user cannot have a login name",
            ));
        }
        if !self.contained {
            if self.login_name.is_empty() {
                return Err(MssecError::validation(
                    "non-contained user requires a login name",
                ));
            }
            validate_principal_name("login", &self.login_name)?;
        }
        if self.external && self.password.is_some() {
            return Err(MssecError::validation("external user cannot have a password"));
        }
        if !self.object_id.is_empty() {
            if !self.external {
                return Err(MssecError::validation(
                    "only external users can have an object id",
                ));
            }
            validate_object_id(&self.object_id)?;
        }
        if !self.default_schema.is_empty() {
            validate_schema_name(&self.default_schema)?;
        }
        if !self.default_language.is_empty() && server.is_azure {
            return Err(MssecError::validation(
                "default language is only supported on SQL Server",
            ));
        }

        match self.flavor() {
            UserFlavor::ContainedSql | UserFlavor::ContainedDirectory => {
                if !server.is_azure && !server.contained_authentication {
                    return Err(MssecError::validation(
                        "contained database authentication is not enabled on this server",
                    ));
                }
            }
            UserFlavor::LoginDirectory if server.is_azure => {
                return Err(MssecError::validation(
                    "login-backed directory users are not supported on Azure SQL Database",
                ));
            }
            _ => {}
        }
        Ok(())
    }

    fn from_row(row: &Row) -> Result<Self> {
        let type_code = row.string("type")?;
        let authentication = row.string("authentication_type_desc")?;
        let external =
            matches!(type_code.trim(), "E" | "X") || authentication == "EXTERNAL";
        // EXTERNAL principals authenticate in the database and have no login
        let contained = matches!(authentication.as_str(), "DATABASE" | "EXTERNAL");
        Ok(Self {
            name: row.string("name")?,
            password: None,
            external,
            contained,
            login_name: if contained {
                String::new()
            } else {
                row.string("login_name")?
            },
            default_schema: row.string("default_schema_name")?,
            default_language: row.string("default_language_name")?,
            object_id: row.string("object_id")?,
            sid: row.string("sid")?,
            principal_id: row.i32("principal_id")?,
        })
    }

    /// Copy with defaults applied; the caller's value is never touched
    fn with_defaults(&self) -> Self {
        let mut user = self.clone();
        if user.default_schema.is_empty() {
            user.default_schema = DEFAULT_SCHEMA.to_string();
        }
        user
    }
}

impl std::fmt::Debug for DatabaseUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUser")
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("external", &self.external)
            .field("contained", &self.contained)
            .field("login_name", &self.login_name)
            .field("default_schema", &self.default_schema)
            .field("default_language", &self.default_language)
            .field("object_id", &self.object_id)
            .field("principal_id", &self.principal_id)
            .finish()
    }
}

fn language_option(sql: DynamicSql, language: &str) -> DynamicSql {
    if language.is_empty() || language.eq_ignore_ascii_case(LANGUAGE_NONE) {
        sql.text("DEFAULT_LANGUAGE = NONE")
    } else {
        sql.text("DEFAULT_LANGUAGE = ")
            .identifier("language", language)
    }
}

/// Stored rows report no language as `""`; callers may spell it `NONE`
fn same_language(a: &str, b: &str) -> bool {
    let normalize = |lang: &str| {
        if lang.eq_ignore_ascii_case(LANGUAGE_NONE) {
            String::new()
        } else {
            lang.to_ascii_lowercase()
        }
    };
    normalize(a) == normalize(b)
}

/// Build the `CREATE USER` statement for a validated user.
///
/// `user` must already carry its default schema.
pub fn build_create_user(user: &DatabaseUser, server: &ServerInfo) -> Result<Statement> {
    let sql = DynamicSql::new()
        .text("CREATE USER ")
        .identifier("name", user.name.as_str());

    let sql = match user.flavor() {
        UserFlavor::ContainedDirectory => {
            let sql = sql.text(" FROM EXTERNAL PROVIDER");
            if user.object_id.is_empty() {
                sql
            } else {
                sql.text(" WITH OBJECT_ID = ")
                    .literal("object_id", user.object_id.as_str())
            }
        }
        UserFlavor::LoginDirectory => sql
            .text(" FOR LOGIN ")
            .identifier("login", user.login_name.as_str())
            .text(" FROM EXTERNAL PROVIDER WITH DEFAULT_SCHEMA = ")
            .identifier("schema", user.default_schema.as_str()),
        UserFlavor::ContainedSql => {
            let password = user
                .password
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| MssecError::validation("contained SQL user requires a password"))?;
            let sql = sql
                .text(" WITH PASSWORD = ")
                .literal("password", password)
                .text(", DEFAULT_SCHEMA = ")
                .identifier("schema", user.default_schema.as_str());
            if server.is_azure {
                sql
            } else {
                language_option(sql.text(", "), &user.default_language)
            }
        }
        UserFlavor::LoginSql => sql
            .text(" FOR LOGIN ")
            .identifier("login", user.login_name.as_str())
            .text(" WITH DEFAULT_SCHEMA = ")
            .identifier("schema", user.default_schema.as_str()),
    };
    Ok(sql.build())
}

/// `ALTER USER` for the differences between the stored row and `desired`;
/// `None` when nothing differs
pub fn build_alter_user(
    current: &DatabaseUser,
    desired: &DatabaseUser,
    server: &ServerInfo,
) -> Option<Statement> {
    let mut sql = DynamicSql::new()
        .text("ALTER USER ")
        .identifier("name", current.name.as_str())
        .text(" WITH ");
    let mut options = 0;

    if !desired.default_schema.eq_ignore_ascii_case(&current.default_schema) {
        sql = sql
            .text(list_separator(options))
            .text("DEFAULT_SCHEMA = ")
            .identifier("schema", desired.default_schema.as_str());
        options += 1;
    }

    if !server.is_azure
        && desired.contained
        && !desired.default_language.is_empty()
        && !same_language(&desired.default_language, &current.default_language)
    {
        sql = language_option(sql.text(list_separator(options)), &desired.default_language);
        options += 1;
    }

    if let Some(password) = desired.password.as_deref().filter(|p| !p.is_empty()) {
        if !desired.external {
            sql = sql
                .text(list_separator(options))
                .text("PASSWORD = ")
                .literal("password", password);
            options += 1;
        }
    }

    if !desired.contained
        && !desired.login_name.is_empty()
        && !desired.login_name.eq_ignore_ascii_case(&current.login_name)
    {
        sql = sql
            .text(list_separator(options))
            .text("LOGIN = ")
            .identifier("login", desired.login_name.as_str());
        options += 1;
    }

    (options > 0).then(|| sql.build())
}

/// Database user operations, available through [`AdminContext::users`]
pub struct UserService<'a> {
    ctx: &'a AdminContext,
}

impl<'a> UserService<'a> {
    pub(crate) fn new(ctx: &'a AdminContext) -> Self {
        Self { ctx }
    }

    /// Validate `user` against the connected server without a round trip
    pub fn validate(&self, user: &DatabaseUser) -> Result<()> {
        user.validate(self.ctx.server())
    }

    /// Create a user. Defaults (schema `dbo`) are applied to a copy.
    #[tracing::instrument(skip(self, user, cancel), fields(user = %user.name))]
    pub async fn create(&self, user: &DatabaseUser, cancel: &CancellationToken) -> Result<()> {
        self.create_user(user, cancel).await.during("create user")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn get(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseUser> {
        self.read_user(name, cancel).await.during("get user")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn list(&self, cancel: &CancellationToken) -> Result<Vec<DatabaseUser>> {
        self.list_users(cancel).await.during("list users")
    }

    /// Bring the stored user in line with `desired`.
    ///
    /// Reads the current row first; nothing is executed when it already
    /// matches.
    #[tracing::instrument(skip(self, desired, cancel), fields(user = %desired.name))]
    pub async fn alter(&self, desired: &DatabaseUser, cancel: &CancellationToken) -> Result<()> {
        self.alter_user(desired, cancel).await.during("alter user")
    }

    #[tracing::instrument(skip(self, cancel))]
    pub async fn drop(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.drop_user(name, cancel).await.during("drop user")
    }

    async fn create_user(&self, user: &DatabaseUser, cancel: &CancellationToken) -> Result<()> {
        user.validate(self.ctx.server())?;
        let user = user.with_defaults();
        let statement = build_create_user(&user, self.ctx.server())?;
        tracing::debug!(flavor = ?user.flavor(), "creating user");

        self.ctx.ready(cancel).await?;
        self.ctx.execute(&statement, cancel).await
    }

    async fn read_user(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseUser> {
        validate_principal_name("user", name)?;
        self.ctx.ready(cancel).await?;
        self.fetch(name, cancel).await
    }

    async fn fetch(&self, name: &str, cancel: &CancellationToken) -> Result<DatabaseUser> {
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.database_principals dp WHERE {} AND dp.name = @P1",
            USER_COLUMNS, USER_TYPES
        ))
        .bind(name);
        let row = self
            .ctx
            .query(&statement, cancel)
            .await?
            .into_first_row()
            .ok_or_else(|| MssecError::not_found(format!("user '{}'", name)))?;
        DatabaseUser::from_row(&row)
    }

    async fn list_users(&self, cancel: &CancellationToken) -> Result<Vec<DatabaseUser>> {
        self.ctx.ready(cancel).await?;
        // principal ids 1-4 are dbo, guest, INFORMATION_SCHEMA and sys
        let statement = Statement::new(format!(
            "SELECT {} FROM sys.database_principals dp WHERE {} AND dp.principal_id > 4 ORDER BY dp.name",
            USER_COLUMNS, USER_TYPES
        ));
        let result = self.ctx.query(&statement, cancel).await?;
        result.rows.iter().map(DatabaseUser::from_row).collect()
    }

    async fn alter_user(&self, desired: &DatabaseUser, cancel: &CancellationToken) -> Result<()> {
        desired.validate(self.ctx.server())?;
        let desired = desired.with_defaults();

        self.ctx.ready(cancel).await?;
        let current = self.fetch(&desired.name, cancel).await?;
        match build_alter_user(&current, &desired, self.ctx.server()) {
            Some(statement) => self.ctx.execute(&statement, cancel).await,
            None => {
                tracing::debug!("user unchanged");
                Ok(())
            }
        }
    }

    async fn drop_user(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        validate_principal_name("user", name)?;
        self.ctx.ready(cancel).await?;
        let user = self.fetch(name, cancel).await?;
        let statement = DynamicSql::new()
            .text("DROP USER ")
            .identifier("name", user.name.as_str())
            .build();
        self.ctx.execute(&statement, cancel).await
    }
}
