//! End-to-end sign-in flows against a mock directory and resource manager
mod common;

use std::sync::{Arc, Mutex};

use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use azlogin::aad::UserCodeInfo;
use azlogin::login::{
    InteractiveOptions, ServicePrincipalOptions, UsernamePasswordOptions, interactive, with_service_principal_secret,
    with_username_password,
};
use azlogin::{AuthError, Credential, TokenAudience, UserType};

use common::{CLIENT_ID, USERNAME, options, token_body, token_path, user_token_body};

async fn mount_subscriptions(server: &MockServer, access_token: &str, subscription: &str) {
    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(header("Authorization", format!("Bearer {}", access_token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{"subscriptionId": subscription, "displayName": format!("Name of {}", subscription), "state": "Enabled"}]
        })))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_tenants(server: &MockServer, access_token: &str, tenants: &[&str]) {
    let value: Vec<_> = tenants.iter().map(|t| json!({"tenantId": t})).collect();
    Mock::given(method("GET"))
        .and(path("/tenants"))
        .and(header("Authorization", format!("Bearer {}", access_token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": value })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_service_principal_login() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path("t1")))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("sp-token")))
        .expect(1)
        .mount(&server)
        .await;
    mount_subscriptions(&server, "sp-token", "s1").await;

    let response = with_service_principal_secret(
        CLIENT_ID,
        "s3cret",
        "t1",
        ServicePrincipalOptions {
            credential: options(&server),
            ..ServicePrincipalOptions::default()
        },
    )
    .await
    .unwrap();

    assert!(matches!(response.credentials, Credential::Secret(_)));
    assert_eq!(response.subscriptions.len(), 1);
    let subscription = &response.subscriptions[0];
    assert_eq!(subscription.id, "s1");
    assert_eq!(subscription.name, "Name of s1");
    assert_eq!(subscription.tenant_id, "t1");
    assert_eq!(subscription.user.user_type, UserType::ServicePrincipal);
    assert_eq!(response.credentials.domain(), Some("t1"));
}

#[tokio::test]
async fn test_service_principal_login_for_graph_skips_subscriptions() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path("t1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("graph-token")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mut credential = options(&server);
    credential.token_audience = Some(TokenAudience::Graph);
    let response = with_service_principal_secret(
        CLIENT_ID,
        "s3cret",
        "t1",
        ServicePrincipalOptions {
            credential,
            ..ServicePrincipalOptions::default()
        },
    )
    .await
    .unwrap();

    assert!(response.subscriptions.is_empty());
}

#[tokio::test]
async fn test_username_password_login_walks_every_tenant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(token_path("common")))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_token_body("common-token", USERNAME)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path("t1")))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-common-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t1-token")))
        .expect(1)
        .mount(&server)
        .await;
    mount_tenants(&server, "common-token", &["t1"]).await;
    mount_subscriptions(&server, "t1-token", "s1").await;

    let response = with_username_password(
        USERNAME,
        "pa55",
        UsernamePasswordOptions {
            client_id: Some(CLIENT_ID.to_string()),
            credential: options(&server),
            ..UsernamePasswordOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(response.subscriptions.len(), 1);
    let subscription = &response.subscriptions[0];
    assert_eq!(subscription.tenant_id, "t1");
    assert_eq!(subscription.user.name, USERNAME);
    assert_eq!(subscription.user.user_type, UserType::User);
    assert_eq!(response.credentials.domain(), Some("common"));
}

#[tokio::test]
async fn test_username_password_login_surfaces_token_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "AADSTS50126: Invalid username or password"
        })))
        .mount(&server)
        .await;

    let err = with_username_password(
        USERNAME,
        "wrong",
        UsernamePasswordOptions {
            credential: options(&server),
            ..UsernamePasswordOptions::default()
        },
    )
    .await
    .unwrap_err();

    match err {
        AuthError::TokenEndpoint { error, .. } => assert_eq!(error, "invalid_grant"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_interactive_login_binds_signed_in_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/common/oauth2/devicecode"))
        .and(query_param("mkt", "de-de"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_code": "ABC-DEF",
            "device_code": "dev-1",
            "verification_url": "https://microsoft.com/devicelogin",
            "expires_in": "900",
            "interval": "1",
            "message": "Code ABC-DEF"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path("common")))
        .and(body_string_contains("grant_type=device_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(user_token_body("device-token", USERNAME)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(token_path("t1")))
        .and(body_string_contains("refresh_token=refresh-device-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("t1-token")))
        .expect(1)
        .mount(&server)
        .await;
    mount_tenants(&server, "device-token", &["t1"]).await;
    mount_subscriptions(&server, "t1-token", "s1").await;

    let shown = Arc::new(Mutex::new(Vec::new()));
    let sink = shown.clone();
    let response = interactive(InteractiveOptions {
        client_id: Some(CLIENT_ID.to_string()),
        language: "de-de".to_string(),
        prompt: Arc::new(move |info: &UserCodeInfo| sink.lock().unwrap().push(info.message.clone())),
        credential: options(&server),
        ..InteractiveOptions::default()
    })
    .await
    .unwrap();

    assert_eq!(*shown.lock().unwrap(), vec!["Code ABC-DEF".to_string()]);
    match &response.credentials {
        Credential::DeviceCode(creds) => assert_eq!(creds.username(), Some(USERNAME)),
        other => panic!("unexpected credential: {:?}", other),
    }
    assert_eq!(response.subscriptions.len(), 1);
    assert_eq!(response.subscriptions[0].user.name, USERNAME);
}
