//! Database user tests, run in the application database.
//!
//! - Contained SQL user create / alter / drop
//! - Login-backed user on premises
//! - Flavor checks that fail before any round trip

use crate::fixtures::{TestServer, Target, admin_context, test_password, unique_name};
use anyhow::{Context, Result};
use mssec_admin::{DEFAULT_SCHEMA, DatabaseUser, Login};
use mssec_core::CancellationToken;
use pretty_assertions::assert_eq;
use rstest::rstest;

/// A contained SQL user can be created, re-pointed at another schema and dropped
#[rstest]
#[case::onprem(TestServer::OnPrem)]
#[case::azure(TestServer::Azure)]
#[tokio::test]
async fn test_contained_user_lifecycle(#[case] server: TestServer) -> Result<()> {
    let Some(ctx) = admin_context(server, Target::App).await? else {
        return Ok(());
    };
    if !ctx.server().is_azure && !ctx.server().contained_authentication {
        tracing::info!("contained authentication disabled, skipping");
        return Ok(());
    }
    let cancel = CancellationToken::new();
    let user = DatabaseUser::contained_sql(unique_name("mssec_user"), test_password());

    ctx.users()
        .create(&user, &cancel)
        .await
        .context("Failed to create contained user")?;
    assert!(user.default_schema.is_empty());

    let created = ctx.users().get(&user.name, &cancel).await?;
    assert!(created.contained);
    assert!(!created.external);
    assert_eq!(created.default_schema, DEFAULT_SCHEMA);

    let desired = DatabaseUser::contained_sql(&user.name, "")
        .with_default_schema("guest");
    ctx.users().alter(&desired, &cancel).await?;
    let altered = ctx.users().get(&user.name, &cancel).await?;
    assert_eq!(altered.default_schema, "guest");

    ctx.users().drop(&user.name, &cancel).await?;
    let err = ctx.users().get(&user.name, &cancel).await.unwrap_err();
    assert!(err.is_not_found());
    Ok(())
}

/// A login-backed user maps onto its server login
#[rstest]
#[case::onprem(TestServer::OnPrem)]
#[tokio::test]
async fn test_login_backed_user(#[case] server: TestServer) -> Result<()> {
    let Some(master) = admin_context(server, Target::Master).await? else {
        return Ok(());
    };
    let Some(ctx) = admin_context(server, Target::App).await? else {
        return Ok(());
    };
    let cancel = CancellationToken::new();
    let login = Login::sql(unique_name("mssec_backing"), test_password());
    master.logins().create(&login, &cancel).await?;

    let user = DatabaseUser::for_login(unique_name("mssec_mapped"), &login.name);
    let outcome = async {
        ctx.users().create(&user, &cancel).await?;
        let created = ctx.users().get(&user.name, &cancel).await?;
        ctx.users().drop(&user.name, &cancel).await?;
        anyhow::Ok(created)
    }
    .await;
    master.logins().drop(&login, &cancel).await?;

    let created = outcome?;
    assert!(!created.contained);
    assert_eq!(created.login_name, login.name);
    Ok(())
}

/// Invalid user shapes are rejected without a round trip
#[rstest]
#[case::onprem(TestServer::OnPrem)]
#[case::azure(TestServer::Azure)]
#[tokio::test]
async fn test_invalid_user_rejected(#[case] server: TestServer) -> Result<()> {
    let Some(ctx) = admin_context(server, Target::App).await? else {
        return Ok(());
    };

    let user = DatabaseUser::contained_directory("mssec_directory").with_password("secret");
    let err = ctx
        .users()
        .create(&user, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_validation());
    Ok(())
}
