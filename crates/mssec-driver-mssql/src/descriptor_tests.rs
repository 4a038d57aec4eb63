//! Tests for connection descriptors and driver URL assembly

use std::collections::HashMap;
use std::time::Duration;

use pretty_assertions::assert_eq;

use mssec_core::CancellationToken;

use crate::{Authentication, ConnectionDescriptor, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_PORT};

fn query_pairs(descriptor: &ConnectionDescriptor) -> Vec<(String, String)> {
    descriptor
        .connection_url()
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn has_pair(pairs: &[(String, String)], key: &str, value: &str) -> bool {
    pairs.iter().any(|(k, v)| k == key && v == value)
}

fn has_key(pairs: &[(String, String)], key: &str) -> bool {
    pairs.iter().any(|(k, _)| k == key)
}

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_defaults() {
    let descriptor =
        ConnectionDescriptor::new("db.example.com", "appdb", Authentication::Default).unwrap();
    assert_eq!(descriptor.port, DEFAULT_PORT);
    assert_eq!(descriptor.connect_timeout_secs, 30);
    assert!(descriptor.require_contained);
    assert!(!descriptor.trust_cert);
}

#[test]
fn test_empty_host_or_database_rejected() {
    let err = ConnectionDescriptor::new("", "appdb", Authentication::Default).unwrap_err();
    assert!(err.is_validation());
    let err = ConnectionDescriptor::new("db", "  ", Authentication::Default).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn test_local_url_uses_userinfo() {
    let descriptor = ConnectionDescriptor::new(
        "db.example.com",
        "master",
        Authentication::local("sa", "p@ss"),
    )
    .unwrap()
    .with_port(14330);

    let url = descriptor.connection_url().unwrap();

    assert_eq!(url.scheme(), "sqlserver");
    assert_eq!(url.host_str(), Some("db.example.com"));
    assert_eq!(url.port(), Some(14330));
    assert_eq!(url.username(), "sa");
    assert!(url.password().is_some());
    let pairs = query_pairs(&descriptor);
    assert!(has_pair(&pairs, "database", "master"));
    assert!(has_pair(&pairs, "app name", "mssec"));
    assert!(!has_key(&pairs, "fedauth"));
}

#[test]
fn test_directory_application_url() {
    let descriptor = ConnectionDescriptor::new(
        "srv.database.windows.net",
        "appdb",
        Authentication::directory_application("abcd", "s!", Some("tnt".into())),
    )
    .unwrap();

    let pairs = query_pairs(&descriptor);

    assert!(has_pair(&pairs, "fedauth", "ActiveDirectoryServicePrincipal"));
    assert!(has_pair(&pairs, "user id", "abcd@tnt"));
    assert!(has_pair(&pairs, "password", "s!"));
}

#[test]
fn test_directory_application_without_tenant() {
    let descriptor = ConnectionDescriptor::new(
        "srv.database.windows.net",
        "appdb",
        Authentication::directory_application("abcd", "s!", None),
    )
    .unwrap();

    assert!(has_pair(&query_pairs(&descriptor), "user id", "abcd"));
}

#[test]
fn test_user_managed_identity_url() {
    let resource = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.ManagedIdentity/userAssignedIdentities/r1";
    let descriptor = ConnectionDescriptor::new(
        "srv.database.windows.net",
        "appdb",
        Authentication::user_managed_identity(Some("u1".into()), Some(resource.into())),
    )
    .unwrap();

    let pairs = query_pairs(&descriptor);

    assert!(has_pair(&pairs, "fedauth", "ActiveDirectoryManagedIdentity"));
    assert!(has_pair(&pairs, "user id", "u1"));
    assert!(has_pair(&pairs, "resource id", resource));
}

#[test]
fn test_system_managed_identity_omits_ids() {
    let descriptor = ConnectionDescriptor::new(
        "srv.database.windows.net",
        "appdb",
        Authentication::ManagedIdentity {
            user_identity: false,
            user_id: Some("u1".into()),
            resource_id: Some("/subscriptions/x/id/r1".into()),
        },
    )
    .unwrap();

    let pairs = query_pairs(&descriptor);

    assert!(has_pair(&pairs, "fedauth", "ActiveDirectoryManagedIdentity"));
    assert!(!has_key(&pairs, "user id"));
    assert!(!has_key(&pairs, "resource id"));
}

#[test]
fn test_default_credential_url() {
    let descriptor =
        ConnectionDescriptor::new("srv.database.windows.net", "appdb", Authentication::Default)
            .unwrap();
    assert!(has_pair(
        &query_pairs(&descriptor),
        "fedauth",
        "ActiveDirectoryDefault"
    ));
}

#[test]
fn test_redacted_url_hides_secrets() {
    let descriptor = ConnectionDescriptor::new(
        "srv",
        "appdb",
        Authentication::directory_application("abcd", "top-secret", None),
    )
    .unwrap();

    let redacted = descriptor.redacted_url().unwrap();

    assert!(!redacted.contains("top-secret"));
    assert!(redacted.contains("fedauth=ActiveDirectoryServicePrincipal"));
}

#[test]
fn test_certificate_credentials_not_supported() {
    let auth = Authentication::DirectoryApplication {
        client_id: "abcd".into(),
        client_secret: "s".into(),
        tenant_id: None,
        certificate_path: Some("/etc/app.pfx".into()),
        certificate_password: None,
    };
    let err = ConnectionDescriptor::new("srv", "appdb", auth).unwrap_err();
    assert!(matches!(err, mssec_core::MssecError::NotSupported(_)));
}

#[test]
fn test_debug_does_not_leak_secrets() {
    let descriptor =
        ConnectionDescriptor::new("srv", "master", Authentication::local("sa", "hunter2")).unwrap();
    assert!(!format!("{:?}", descriptor).contains("hunter2"));
}

#[test]
fn test_from_params_selects_local() {
    let descriptor = ConnectionDescriptor::from_params(&params(&[
        ("host", "localhost"),
        ("port", "1434"),
        ("database", "master"),
        ("user", "sa"),
        ("password", "secret"),
        ("trust_cert", "true"),
        ("require_contained", "false"),
    ]))
    .unwrap();

    assert_eq!(descriptor.port, 1434);
    assert!(descriptor.trust_cert);
    assert!(!descriptor.require_contained);
    assert_eq!(descriptor.authentication, Authentication::local("sa", "secret"));
}

#[test]
fn test_from_params_selects_directory_application() {
    let descriptor = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("client_id", "abcd"),
        ("client_secret", "s!"),
        ("tenant_id", "tnt"),
    ]))
    .unwrap();

    assert_eq!(
        descriptor.authentication,
        Authentication::directory_application("abcd", "s!", Some("tnt".into()))
    );
}

#[test]
fn test_from_params_selects_managed_identity_and_default() {
    let descriptor = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("user_identity", "1"),
        ("user_id", "u1"),
    ]))
    .unwrap();
    assert_eq!(
        descriptor.authentication,
        Authentication::user_managed_identity(Some("u1".into()), None)
    );

    let descriptor =
        ConnectionDescriptor::from_params(&params(&[("host", "srv"), ("database", "appdb")]))
            .unwrap();
    assert_eq!(descriptor.authentication, Authentication::Default);
}

#[test]
fn test_from_params_rejects_bad_port() {
    let err = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("port", "not-a-port"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("invalid port"));
}

#[test]
fn test_deserialize_with_tagged_authentication() {
    let json = r#"{
        "host": "srv.database.windows.net",
        "database": "appdb",
        "authentication": { "kind": "managed_identity", "user_identity": true, "user_id": "u1" }
    }"#;

    let descriptor: ConnectionDescriptor = serde_json::from_str(json).unwrap();

    assert_eq!(descriptor.port, DEFAULT_PORT);
    assert!(descriptor.require_contained);
    assert_eq!(
        descriptor.authentication,
        Authentication::user_managed_identity(Some("u1".into()), None)
    );
}

// ============================================================================
// Connect timeout
// ============================================================================

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS);

#[test]
fn test_unset_timeout_is_thirty_seconds() {
    let descriptor =
        ConnectionDescriptor::from_params(&params(&[("host", "srv"), ("database", "appdb")]))
            .unwrap();
    assert_eq!(descriptor.connect_timeout(), DEFAULT_TIMEOUT);
}

#[test]
fn test_from_params_reads_connect_timeout() {
    let descriptor = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("connect_timeout_secs", "5"),
    ]))
    .unwrap();
    assert_eq!(descriptor.connect_timeout(), Duration::from_secs(5));

    let err = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("connect_timeout_secs", "soon"),
    ]))
    .unwrap_err();
    assert!(err.to_string().contains("invalid connect timeout"));
}

#[test]
fn test_zero_timeout_falls_back_to_default() {
    let from_params = ConnectionDescriptor::from_params(&params(&[
        ("host", "srv"),
        ("database", "appdb"),
        ("connect_timeout_secs", "0"),
    ]))
    .unwrap();
    assert_eq!(from_params.connect_timeout(), DEFAULT_TIMEOUT);

    let from_builder = ConnectionDescriptor::new("srv", "appdb", Authentication::Default)
        .unwrap()
        .with_connect_timeout(Duration::ZERO);
    assert_eq!(from_builder.connect_timeout(), DEFAULT_TIMEOUT);

    let mut from_field = ConnectionDescriptor::new("srv", "appdb", Authentication::Default).unwrap();
    from_field.connect_timeout_secs = 0;
    assert_eq!(from_field.connect_timeout(), DEFAULT_TIMEOUT);

    let json = r#"{
        "host": "srv",
        "database": "appdb",
        "connect_timeout_secs": 0,
        "authentication": { "kind": "default" }
    }"#;
    let from_json: ConnectionDescriptor = serde_json::from_str(json).unwrap();
    assert_eq!(from_json.connect_timeout(), DEFAULT_TIMEOUT);
}

#[test]
fn test_sub_second_builder_timeout_falls_back_to_default() {
    let descriptor = ConnectionDescriptor::new("srv", "appdb", Authentication::Default)
        .unwrap()
        .with_connect_timeout(Duration::from_millis(500));
    assert_eq!(descriptor.connect_timeout(), DEFAULT_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn test_connect_with_zero_timeout_returns_error() {
    let descriptor = ConnectionDescriptor::from_params(&params(&[
        ("host", "127.0.0.1"),
        ("port", "1"),
        ("database", "master"),
        ("user", "sa"),
        ("password", "secret"),
        ("connect_timeout_secs", "0"),
    ]))
    .unwrap();

    let result = descriptor.connect(&CancellationToken::new()).await;

    assert!(result.is_err());
}
