//! Tests for the dynamic DDL builder

use super::*;
use pretty_assertions::assert_eq;

fn wrap(expr: &str) -> String {
    format!("DECLARE @sql NVARCHAR(MAX); SET @sql = {}; EXEC(@sql);", expr)
}

// ============================================================================
// Expression Tests
// ============================================================================

mod expression_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_adjacent_text_is_merged() {
        let sql = DynamicSql::new().text("ALTER ").text("LOGIN ");
        assert_eq!(sql.expression(), "N'ALTER LOGIN '");
    }

    #[test]
    fn test_text_quotes_are_doubled() {
        let sql = DynamicSql::new().text("WITH PASSWORD = 'x'");
        assert_eq!(sql.expression(), "N'WITH PASSWORD = ''x'''");
    }

    #[test]
    fn test_empty_builder() {
        let sql = DynamicSql::new();
        assert!(sql.is_empty());
        assert_eq!(sql.build().sql, wrap("N''"));
    }

    #[test]
    fn test_literal_is_escaped_on_the_server() {
        let stmt = DynamicSql::new()
            .text("CREATE LOGIN ")
            .identifier("login", "app")
            .text(" WITH PASSWORD = ")
            .literal("password", "it's")
            .build();

        assert_eq!(
            stmt.sql,
            wrap(
                "N'CREATE LOGIN ' + QUOTENAME(@P1) + N' WITH PASSWORD = ''' + REPLACE(@P2, N'''', N'''''') + N''''"
            )
        );
        assert_eq!(stmt.params, vec![Value::from("app"), Value::from("it's")]);
    }

    #[test]
    fn test_number_is_cast() {
        let stmt = DynamicSql::new().text("KILL ").number("session", 57).build();
        assert_eq!(stmt.sql, wrap("N'KILL ' + CAST(@P1 AS NVARCHAR(20))"));
        assert_eq!(stmt.params, vec![Value::Int32(57)]);
    }

    #[test]
    fn test_validated_tokens_are_inlined() {
        let schema = SqlIdentifier::schema("sales").unwrap();
        let permission = PermissionName::parse("VIEW DEFINITION").unwrap();

        let stmt = DynamicSql::new()
            .text("GRANT ")
            .permission(&permission)
            .text(" ON SCHEMA::")
            .raw_identifier(&schema)
            .text(" TO ")
            .identifier("role", "auditors")
            .build();

        assert_eq!(
            stmt.sql,
            wrap("N'GRANT VIEW DEFINITION ON SCHEMA::[sales] TO ' + QUOTENAME(@P1)")
        );
    }
}

// ============================================================================
// Parameter Binding Tests
// ============================================================================

mod binding_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_positions_follow_first_use() {
        let stmt = DynamicSql::new()
            .text("ALTER ROLE ")
            .identifier("role", "readers")
            .text(" ADD MEMBER ")
            .identifier("member", "alice")
            .build();

        assert!(stmt.sql.contains("QUOTENAME(@P1)"));
        assert!(stmt.sql.contains("QUOTENAME(@P2)"));
        assert_eq!(stmt.params, vec![Value::from("readers"), Value::from("alice")]);
    }

    #[test]
    fn test_reused_name_shares_position() {
        let stmt = DynamicSql::new()
            .identifier("name", "app")
            .text(" / ")
            .identifier("name", "ignored")
            .build();

        assert_eq!(
            stmt.sql,
            wrap("QUOTENAME(@P1) + N' / ' + QUOTENAME(@P1)")
        );
        assert_eq!(stmt.params, vec![Value::from("app")]);
    }

    #[test]
    fn test_hostile_names_never_reach_sql_text() {
        let hostile = "x]; DROP LOGIN sa; --";
        let stmt = DynamicSql::new()
            .text("DROP USER ")
            .identifier("user", hostile)
            .build();

        assert!(!stmt.sql.contains("DROP LOGIN"));
        assert_eq!(stmt.params, vec![Value::from(hostile)]);
    }
}
