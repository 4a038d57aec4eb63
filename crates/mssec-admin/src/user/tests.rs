//! Tests for database user management

use super::*;
use crate::context::fixtures::{azure, context, onprem};
use mssec_core::testing::MockConnection;
use mssec_core::{CancellationToken, MssecError, Row, ServerInfo, Value};
use pretty_assertions::assert_eq;

const OBJECT_ID: &str = "6f8e2a4c-3b1d-4e5f-9a7b-0c1d2e3f4a5b";

fn wrap(expr: &str) -> String {
    format!("DECLARE @sql NVARCHAR(MAX); SET @sql = {}; EXEC(@sql);", expr)
}

fn non_contained_onprem() -> ServerInfo {
    ServerInfo {
        contained_authentication: false,
        ..onprem("appdb")
    }
}

fn user_row(name: &str, authentication: &str, schema: &str, login: &str) -> Row {
    Row::from_pairs([
        ("name", Value::from(name)),
        ("principal_id", Value::Int32(5)),
        ("type", Value::from("S")),
        ("authentication_type_desc", Value::from(authentication)),
        ("default_schema_name", Value::from(schema)),
        ("default_language_name", Value::from("")),
        ("login_name", Value::from(login)),
        ("object_id", Value::from("")),
        ("sid", Value::from("0x01050000")),
    ])
}

// ============================================================================
// Validation Tests
// ============================================================================

mod validation_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(user: &DatabaseUser, server: &ServerInfo) -> String {
        let err = user.validate(server).unwrap_err();
        assert!(err.is_validation(), "{err}");
        err.to_string()
    }

    #[test]
    fn test_contained_user_cannot_have_login() {
        let mut user = DatabaseUser::contained_sql("u1", "pw");
        user.login_name = "l1".into();
        assert!(message(&user, &onprem("appdb")).contains("cannot have a login name"));
    }

    #[test]
    fn test_login_backed_user_needs_login() {
        let user = DatabaseUser::for_login("u1", "");
        assert!(message(&user, &onprem("appdb")).contains("requires a login name"));
    }

    #[test]
    fn test_external_user_cannot_have_password() {
        let user = DatabaseUser::contained_directory("ops").with_password("pw");
        assert!(message(&user, &azure("appdb")).contains("cannot have a password"));
    }

    #[test]
    fn test_object_id_only_for_external_users() {
        let user = DatabaseUser::contained_sql("u1", "pw").with_object_id(OBJECT_ID);
        assert!(message(&user, &onprem("appdb")).contains("only external users"));

        let user = DatabaseUser::contained_directory("ops").with_object_id("nope");
        assert!(message(&user, &azure("appdb")).contains("invalid object id"));

        let user = DatabaseUser::contained_directory("ops").with_object_id(OBJECT_ID);
        assert!(user.validate(&azure("appdb")).is_ok());
    }

    #[test]
    fn test_default_language_only_onprem() {
        let user = DatabaseUser::contained_sql("u1", "pw").with_default_language("Deutsch");
        assert!(message(&user, &azure("appdb")).contains("default language"));
        assert!(user.validate(&onprem("appdb")).is_ok());
    }

    #[test]
    fn test_contained_sql_user_needs_contained_authentication() {
        let user = DatabaseUser::contained_sql("u1", "P@ss1");
        assert!(message(&user, &non_contained_onprem()).contains("contained database authentication"));
        assert!(user.validate(&azure("appdb")).is_ok());
    }

    #[test]
    fn test_contained_directory_user_needs_contained_authentication() {
        let user = DatabaseUser::contained_directory("ops");
        assert!(message(&user, &non_contained_onprem()).contains("contained database authentication"));
        assert!(user.validate(&onprem("appdb")).is_ok());
        assert!(user.validate(&azure("appdb")).is_ok());
    }

    #[test]
    fn test_login_backed_directory_user_rejected_on_azure() {
        let user = DatabaseUser::for_login("ops", "ops").with_external(true);
        assert!(message(&user, &azure("appdb")).contains("not supported on Azure"));
        assert!(user.validate(&onprem("appdb")).is_ok());
    }

    #[test]
    fn test_bad_default_schema() {
        let user = DatabaseUser::for_login("u1", "l1").with_default_schema("bad schema");
        assert!(message(&user, &onprem("appdb")).contains("invalid SQL identifier format"));
    }

    #[test]
    fn test_flavors() {
        assert_eq!(
            DatabaseUser::contained_directory("a").flavor(),
            UserFlavor::ContainedDirectory
        );
        assert_eq!(
            DatabaseUser::for_login("a", "a").with_external(true).flavor(),
            UserFlavor::LoginDirectory
        );
        assert_eq!(DatabaseUser::contained_sql("a", "p").flavor(), UserFlavor::ContainedSql);
        assert_eq!(DatabaseUser::for_login("a", "a").flavor(), UserFlavor::LoginSql);
    }
}

// ============================================================================
// DDL Tests
// ============================================================================

mod ddl_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_contained_directory_with_object_id() {
        let user = DatabaseUser::contained_directory("ops").with_object_id(OBJECT_ID);

        let stmt = build_create_user(&user, &azure("appdb")).unwrap();

        assert_eq!(
            stmt.sql,
            wrap(
                "N'CREATE USER ' + QUOTENAME(@P1) + N' FROM EXTERNAL PROVIDER WITH OBJECT_ID = ''' + \
                 REPLACE(@P2, N'''', N'''''') + N''''"
            )
        );
        assert_eq!(stmt.params, vec![Value::from("ops"), Value::from(OBJECT_ID)]);
    }

    #[test]
    fn test_login_directory() {
        let user = DatabaseUser::for_login("ops", "ops_login")
            .with_external(true)
            .with_default_schema("sales");

        let stmt = build_create_user(&user, &onprem("appdb")).unwrap();

        assert_eq!(
            stmt.sql,
            wrap(
                "N'CREATE USER ' + QUOTENAME(@P1) + N' FOR LOGIN ' + QUOTENAME(@P2) + \
                 N' FROM EXTERNAL PROVIDER WITH DEFAULT_SCHEMA = ' + QUOTENAME(@P3)"
            )
        );
    }

    #[test]
    fn test_contained_sql_on_azure_omits_language() {
        let user = DatabaseUser::contained_sql("u1", "P@ss1").with_default_schema("dbo");

        let stmt = build_create_user(&user, &azure("appdb")).unwrap();

        assert!(!stmt.sql.contains("DEFAULT_LANGUAGE"));
        assert!(stmt.sql.ends_with("N''', DEFAULT_SCHEMA = ' + QUOTENAME(@P3); EXEC(@sql);"));
    }

    #[test]
    fn test_contained_sql_with_language() {
        let user = DatabaseUser::contained_sql("u1", "P@ss1")
            .with_default_schema("dbo")
            .with_default_language("Deutsch");

        let stmt = build_create_user(&user, &onprem("appdb")).unwrap();

        assert!(stmt.sql.contains("N', DEFAULT_LANGUAGE = ' + QUOTENAME(@P4)"));
        assert_eq!(stmt.params[3], Value::from("Deutsch"));
    }

    #[test]
    fn test_login_sql() {
        let user = DatabaseUser::for_login("u1", "l1").with_default_schema("dbo");

        let stmt = build_create_user(&user, &azure("appdb")).unwrap();

        assert_eq!(
            stmt.sql,
            wrap(
                "N'CREATE USER ' + QUOTENAME(@P1) + N' FOR LOGIN ' + QUOTENAME(@P2) + \
                 N' WITH DEFAULT_SCHEMA = ' + QUOTENAME(@P3)"
            )
        );
        assert_eq!(
            stmt.params,
            vec![Value::from("u1"), Value::from("l1"), Value::from("dbo")]
        );
    }

    #[test]
    fn test_contained_sql_requires_password() {
        let mut user = DatabaseUser::contained_sql("u1", "");
        user.default_schema = "dbo".into();
        assert!(build_create_user(&user, &onprem("appdb")).unwrap_err().is_validation());
    }

    #[test]
    fn test_alter_only_deltas() {
        let current = DatabaseUser::for_login("u1", "l1").with_default_schema("dbo");
        let desired = DatabaseUser::for_login("u1", "l2").with_default_schema("sales");

        let stmt = build_alter_user(&current, &desired, &onprem("appdb")).unwrap();

        assert_eq!(
            stmt.sql,
            wrap(
                "N'ALTER USER ' + QUOTENAME(@P1) + N' WITH DEFAULT_SCHEMA = ' + QUOTENAME(@P2) + \
                 N', LOGIN = ' + QUOTENAME(@P3)"
            )
        );
    }

    #[test]
    fn test_alter_without_delta() {
        let current = DatabaseUser::for_login("u1", "L1").with_default_schema("dbo");
        let desired = DatabaseUser::for_login("u1", "l1").with_default_schema("DBO");

        assert!(build_alter_user(&current, &desired, &onprem("appdb")).is_none());
    }

    #[test]
    fn test_alter_treats_empty_language_as_none() {
        let current = DatabaseUser::contained_sql("u1", "").with_default_schema("dbo");
        let desired = DatabaseUser::contained_sql("u1", "")
            .with_default_schema("dbo")
            .with_default_language("NONE");

        assert!(build_alter_user(&current, &desired, &onprem("appdb")).is_none());

        let current = current.with_default_language("Deutsch");
        let stmt = build_alter_user(&current, &desired, &onprem("appdb")).unwrap();
        assert!(stmt.sql.contains("DEFAULT_LANGUAGE = NONE"));
    }

    #[test]
    fn test_alter_password_and_language() {
        let current = DatabaseUser::contained_sql("u1", "old").with_default_schema("dbo");
        let desired = DatabaseUser::contained_sql("u1", "new")
            .with_default_schema("dbo")
            .with_default_language("Deutsch");

        let stmt = build_alter_user(&current, &desired, &onprem("appdb")).unwrap();

        assert!(stmt.sql.contains("N' WITH DEFAULT_LANGUAGE = ' + QUOTENAME(@P2) + N', PASSWORD = '''"));
        let stmt = build_alter_user(&current, &desired, &azure("appdb")).unwrap();
        assert!(!stmt.sql.contains("DEFAULT_LANGUAGE"));
    }
}

// ============================================================================
// Service Tests
// ============================================================================

mod service_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_contained_user_on_contained_onprem() {
        let conn = MockConnection::new();
        let ctx = context(&conn, onprem("appdb"));
        let user = DatabaseUser::contained_sql("u1", "P@ss1");

        ctx.users().create(&user, &CancellationToken::new()).await.unwrap();

        let applied = conn.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(
            applied[0].sql,
            wrap(
                "N'CREATE USER ' + QUOTENAME(@P1) + N' WITH PASSWORD = ''' + \
                 REPLACE(@P2, N'''', N'''''') + N''', DEFAULT_SCHEMA = ' + QUOTENAME(@P3) + \
                 N', DEFAULT_LANGUAGE = NONE'"
            )
        );
        assert_eq!(
            applied[0].params,
            vec![Value::from("u1"), Value::from("P@ss1"), Value::from("dbo")]
        );
        // defaults land on a copy
        assert!(user.default_schema.is_empty());
    }

    #[tokio::test]
    async fn test_contained_user_on_non_contained_onprem() {
        let conn = MockConnection::new();
        let ctx = context(&conn, non_contained_onprem());

        let err = ctx
            .users()
            .create(&DatabaseUser::contained_sql("u1", "P@ss1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(conn.ping_count(), 0);
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_get_maps_authentication_type() {
        let conn = MockConnection::new();
        conn.on_query("sys.database_principals", vec![user_row("u1", "DATABASE", "dbo", "junk")]);
        let ctx = context(&conn, onprem("appdb"));

        let user = ctx.users().get("u1", &CancellationToken::new()).await.unwrap();

        assert!(user.contained);
        assert!(!user.external);
        assert!(user.login_name.is_empty());
        assert_eq!(user.default_schema, "dbo");
        assert_eq!(conn.queries()[0].params, vec![Value::from("u1")]);
    }

    #[tokio::test]
    async fn test_get_external_user_is_contained_directory() {
        let row = Row::from_pairs([
            ("name", Value::from("ops")),
            ("principal_id", Value::Int32(6)),
            ("type", Value::from("E")),
            ("authentication_type_desc", Value::from("EXTERNAL")),
            ("default_schema_name", Value::from("dbo")),
            ("default_language_name", Value::from("")),
            ("login_name", Value::from("")),
            ("object_id", Value::from(OBJECT_ID)),
            ("sid", Value::from("0x01060000")),
        ]);
        let conn = MockConnection::new();
        conn.on_query("sys.database_principals", vec![row]);
        let ctx = context(&conn, azure("appdb"));

        let user = ctx.users().get("ops", &CancellationToken::new()).await.unwrap();

        assert!(user.external);
        assert!(user.contained);
        assert_eq!(user.flavor(), UserFlavor::ContainedDirectory);
    }

    #[tokio::test]
    async fn test_get_login_backed_user() {
        let conn = MockConnection::new();
        conn.on_query("sys.database_principals", vec![user_row("u1", "INSTANCE", "dbo", "l1")]);
        let ctx = context(&conn, onprem("appdb"));

        let user = ctx.users().get("u1", &CancellationToken::new()).await.unwrap();

        assert!(!user.contained);
        assert_eq!(user.login_name, "l1");
        assert_eq!(user.flavor(), UserFlavor::LoginSql);
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let conn = MockConnection::new();
        let ctx = context(&conn, onprem("appdb"));

        let err = ctx.users().get("ghost", &CancellationToken::new()).await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_alter_reads_then_applies_delta() {
        let conn = MockConnection::new();
        conn.on_query("sys.database_principals", vec![user_row("u1", "INSTANCE", "dbo", "l1")]);
        let ctx = context(&conn, onprem("appdb"));
        let desired = DatabaseUser::for_login("u1", "l1").with_default_schema("sales");

        ctx.users().alter(&desired, &CancellationToken::new()).await.unwrap();

        let applied = conn.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].params, vec![Value::from("u1"), Value::from("sales")]);
    }

    #[tokio::test]
    async fn test_alter_without_delta_executes_nothing() {
        let conn = MockConnection::new();
        conn.on_query("sys.database_principals", vec![user_row("u1", "INSTANCE", "dbo", "l1")]);
        let ctx = context(&conn, onprem("appdb"));

        ctx.users()
            .alter(&DatabaseUser::for_login("u1", "l1"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(conn.queries().len(), 1);
        assert!(conn.statements().is_empty());
    }

    #[tokio::test]
    async fn test_drop_confirms_existence() {
        let conn = MockConnection::new();
        let ctx = context(&conn, onprem("appdb"));

        let err = ctx.users().drop("ghost", &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(conn.statements().is_empty());

        conn.on_query("sys.database_principals", vec![user_row("u1", "DATABASE", "dbo", "")]);
        ctx.users().drop("u1", &CancellationToken::new()).await.unwrap();
        assert_eq!(
            conn.applied()[0].sql,
            wrap("N'DROP USER ' + QUOTENAME(@P1)")
        );
    }

    #[tokio::test]
    async fn test_list_users() {
        let conn = MockConnection::new();
        conn.on_query(
            "dp.principal_id > 4",
            vec![
                user_row("u1", "DATABASE", "dbo", ""),
                user_row("u2", "INSTANCE", "dbo", "l2"),
            ],
        );
        let ctx = context(&conn, onprem("appdb"));

        let users = ctx.users().list(&CancellationToken::new()).await.unwrap();

        assert_eq!(users.len(), 2);
        assert!(users[0].contained);
        assert!(!users[1].contained);
    }

    #[tokio::test]
    async fn test_create_surfaces_driver_error_with_operation() {
        let conn = MockConnection::new();
        conn.fail_execute_containing("CREATE USER", "User, group, or role 'u1' already exists");
        let ctx = context(&conn, onprem("appdb"));

        let err = ctx
            .users()
            .create(&DatabaseUser::for_login("u1", "l1"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err.root(), MssecError::Driver(_)));
        assert!(err.to_string().starts_with("create user: "));
    }

    #[test]
    fn test_debug_redacts_password() {
        let user = DatabaseUser::contained_sql("u1", "P@ss1");
        assert!(!format!("{:?}", user).contains("P@ss1"));
    }
}
