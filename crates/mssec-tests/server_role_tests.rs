//! Server role tests, run in `master`.
//!
//! - Create a role, add and remove a login, drop with members
//! - Server role changes are refused on Azure SQL Database

use crate::fixtures::{TestServer, Target, admin_context, test_password, unique_name};
use anyhow::Result;
use mssec_admin::{Login, ServerRole};
use mssec_core::CancellationToken;
use pretty_assertions::assert_eq;
use rstest::rstest;

/// Dropping a role with members removes the members first
#[rstest]
#[case::onprem(TestServer::OnPrem)]
#[tokio::test]
async fn test_server_role_membership(#[case] server: TestServer) -> Result<()> {
    let Some(ctx) = admin_context(server, Target::Master).await? else {
        return Ok(());
    };
    let cancel = CancellationToken::new();
    let role = ServerRole::new(unique_name("mssec_srole"));
    let login = Login::sql(unique_name("mssec_member"), test_password());

    ctx.logins().create(&login, &cancel).await?;
    ctx.server_roles().create(&role, &cancel).await?;
    assert_eq!(role.owning_principal_id, 0);

    ctx.server_roles()
        .add_member(&role.name, &login.name, &cancel)
        .await?;
    let members = ctx.server_roles().members(&role.name, &cancel).await?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].name, login.name);

    ctx.server_roles().drop(&role.name, &cancel).await?;
    let err = ctx.server_roles().get(&role.name, &cancel).await.unwrap_err();
    assert!(err.is_not_found());

    ctx.logins().drop(&login, &cancel).await?;
    Ok(())
}

/// Fixed roles are read like any other
#[rstest]
#[case::onprem(TestServer::OnPrem)]
#[tokio::test]
async fn test_fixed_role_is_reported(#[case] server: TestServer) -> Result<()> {
    let Some(ctx) = admin_context(server, Target::Master).await? else {
        return Ok(());
    };

    let role = ctx
        .server_roles()
        .get("sysadmin", &CancellationToken::new())
        .await?;
    assert!(role.is_fixed_role);
    Ok(())
}

#[rstest]
#[case::azure(TestServer::Azure)]
#[tokio::test]
async fn test_server_role_create_refused_on_azure(#[case] server: TestServer) -> Result<()> {
    let Some(ctx) = admin_context(server, Target::Master).await? else {
        return Ok(());
    };

    let err = ctx
        .server_roles()
        .create(&ServerRole::new("mssec_never"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_topology());
    Ok(())
}
