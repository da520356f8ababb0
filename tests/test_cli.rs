//! Azure CLI credential tests driven by a fake `az` script
#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use tempfile::TempDir;

use azlogin::credentials::{AzCli, CliAccessToken, ListAllSubscriptionOptions};
use azlogin::{AuthError, AzureCliCredentials, Credential, UserType};

const FAKE_AZ: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
case "$1 $2" in
  "account show")
    sub=sub-default
    if [ "$3" = "-s" ]; then sub="$4"; fi
    cat <<EOF
{"id": "$sub", "name": "Dev", "tenantId": "tenant-1", "user": {"name": "me@contoso.com", "type": "user"}, "state": "Enabled", "isDefault": true, "cloudName": "AzureCloud", "homeTenantId": "tenant-1"}
EOF
    ;;
  "account get-access-token")
    res=""
    if [ "$5" = "--resource" ]; then res="@$6"; fi
    cat <<EOF
{"accessToken": "cli-token-$4$res", "expires_on": $(( $(date +%s) + 3600 )), "subscription": "$4", "tenant": "tenant-1", "tokenType": "Bearer"}
EOF
    ;;
  "account list")
    cat <<EOF
[{"id": "sub-1", "name": "Dev", "tenantId": "tenant-1", "user": {"name": "me@contoso.com", "type": "user"}, "isDefault": true, "cloudName": "AzureChinaCloud"},
 {"id": "sub-2", "name": "Ops", "tenantId": "tenant-2", "user": {"name": "sp-client", "type": "servicePrincipal"}, "isDefault": false, "cloudName": "AzureCloud"}]
EOF
    ;;
  "account set")
    ;;
  *)
    echo "ERROR: 'az $*' is not supported" >&2
    exit 2
    ;;
esac
"#;

fn fake_az(dir: &TempDir) -> AzCli {
    let script = dir.path().join("az");
    fs::write(&script, FAKE_AZ).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    AzCli::with_program(script.to_string_lossy().into_owned())
}

fn calls(dir: &Path) -> Vec<String> {
    let log: PathBuf = dir.join("calls.log");
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(String::from)
        .collect()
}

#[tokio::test]
async fn test_create_reads_default_subscription_and_token() {
    let dir = TempDir::new().unwrap();
    let creds = AzureCliCredentials::create(fake_az(&dir), None).await.unwrap();

    assert_eq!(creds.subscription_info().id, "sub-default");
    assert_eq!(creds.subscription_info().environment_name.as_deref(), Some("AzureCloud"));
    assert_eq!(creds.token_info().access_token, "cli-token-sub-default");
    assert_eq!(
        calls(dir.path()),
        vec![
            "account show --output json".to_string(),
            "account get-access-token -s sub-default --output json".to_string(),
        ]
    );

    // token is still fresh, no further CLI call
    let credential = Credential::from(creds);
    let token = credential.get_token().await.unwrap();
    assert_eq!(token.authorization_header(), "Bearer cli-token-sub-default");
    assert_eq!(token.tenant_id.as_deref(), Some("tenant-1"));
    assert_eq!(calls(dir.path()).len(), 2);

    let user = credential.user().unwrap();
    assert_eq!(user.user_type, UserType::User);
}

#[tokio::test]
async fn test_create_for_named_subscription() {
    let dir = TempDir::new().unwrap();
    let creds = AzureCliCredentials::create(fake_az(&dir), Some("sub-9")).await.unwrap();

    assert_eq!(creds.subscription_info().id, "sub-9");
    assert_eq!(creds.token_info().subscription, "sub-9");
    assert_eq!(calls(dir.path())[0], "account show -s sub-9 --output json");
}

#[tokio::test]
async fn test_token_for_other_subscription_is_refreshed() {
    let dir = TempDir::new().unwrap();
    let cli = fake_az(&dir);
    let subscription = cli.get_default_subscription().await.unwrap();
    let foreign = CliAccessToken {
        access_token: "other".to_string(),
        expires_on: Utc::now() + Duration::hours(1),
        subscription: "sub-other".to_string(),
        tenant: "tenant-1".to_string(),
        token_type: "Bearer".to_string(),
    };

    let creds = AzureCliCredentials::new(cli, subscription, foreign).with_resource("https://vault.azure.net");
    let token = creds.get_token().await.unwrap();

    assert_eq!(token.access_token, "cli-token-sub-default@https://vault.azure.net");
    assert_eq!(creds.token_info().subscription, "sub-default");
    assert_eq!(
        calls(dir.path()).last().unwrap(),
        "account get-access-token -s sub-default --resource https://vault.azure.net --output json"
    );
}

#[tokio::test]
async fn test_resource_override_fetches_token_for_that_resource() {
    let dir = TempDir::new().unwrap();
    let creds = AzureCliCredentials::create(fake_az(&dir), None)
        .await
        .unwrap()
        .with_resource("https://vault.azure.net");

    let token = creds.get_token().await.unwrap();
    assert_eq!(token.access_token, "cli-token-sub-default@https://vault.azure.net");
    assert_eq!(
        calls(dir.path()).last().unwrap(),
        "account get-access-token -s sub-default --resource https://vault.azure.net --output json"
    );

    // the vault token is now held and reused
    assert_eq!(creds.get_token().await.unwrap().access_token, token.access_token);
    assert_eq!(calls(dir.path()).len(), 3);
}

#[tokio::test]
async fn test_token_close_to_expiry_is_refreshed() {
    let dir = TempDir::new().unwrap();
    let cli = fake_az(&dir);
    let subscription = cli.get_default_subscription().await.unwrap();
    let expiring = CliAccessToken {
        access_token: "expiring".to_string(),
        expires_on: Utc::now() + Duration::minutes(2),
        subscription: "sub-default".to_string(),
        tenant: "tenant-1".to_string(),
        token_type: "Bearer".to_string(),
    };

    let creds = AzureCliCredentials::new(cli, subscription, expiring);
    assert_eq!(creds.get_token().await.unwrap().access_token, "cli-token-sub-default");
}

#[tokio::test]
async fn test_list_all_subscriptions() {
    let dir = TempDir::new().unwrap();
    let cli = fake_az(&dir);

    let subscriptions = cli
        .list_all_subscriptions(ListAllSubscriptionOptions {
            all: true,
            refresh: true,
        })
        .await
        .unwrap();

    assert_eq!(subscriptions.len(), 2);
    assert_eq!(subscriptions[0].environment_name.as_deref(), Some("AzureChinaCloud"));
    assert!(subscriptions[0].is_default);
    assert_eq!(subscriptions[1].user.user_type, UserType::ServicePrincipal);
    assert_eq!(calls(dir.path()), vec!["account list --all --refresh --output json".to_string()]);

    cli.set_default_subscription("sub-2").await.unwrap();
    assert_eq!(calls(dir.path()).last().unwrap(), "account set -s sub-2 --output json");
}

#[tokio::test]
async fn test_cli_failure_is_wrapped() {
    let dir = TempDir::new().unwrap();
    let cli = fake_az(&dir);

    let err = cli.exec(&["group", "list"]).await.unwrap_err();
    assert!(matches!(err, AuthError::Cli(_)));
    assert!(err.to_string().contains("is not supported"));
}
