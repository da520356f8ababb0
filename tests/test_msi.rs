//! Managed identity tests against mock identity endpoints

use reqwest::header::AUTHORIZATION;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use azlogin::credentials::{MsiAppServiceOptions, MsiVmOptions};
use azlogin::login::with_msi;
use azlogin::{AuthError, Credential, MsiAppServiceTokenCredentials, MsiVmTokenCredentials};

const SECRET: &str = "69418689F1E342DD946CB82994CDA3CB";

fn app_service(server: &MockServer, resource: &str) -> MsiAppServiceTokenCredentials {
    MsiAppServiceTokenCredentials::new(MsiAppServiceOptions {
        msi_endpoint: Some(format!("{}/MSI/token", server.uri())),
        msi_secret: Some(SECRET.to_string()),
        resource: resource.to_string(),
        ..MsiAppServiceOptions::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_vm_extension_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("Metadata", "true"))
        .and(body_string("resource=https%3A%2F%2Fmanagement.azure.com%2F"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"X","token_type":"Bearer","expires_on":"1502930996","expires_in":"3599","resource":"https://management.azure.com/"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let token = with_msi(MsiVmOptions {
        port: server.address().port(),
        ..MsiVmOptions::default()
    })
    .await
    .unwrap();

    assert_eq!(token.access_token, "X");
    assert_eq!(token.token_type, "Bearer");
    assert_eq!(token.expires_on.unwrap().timestamp(), 1502930996);
    assert_eq!(token.expires_in, Some(3599));
}

#[tokio::test]
async fn test_vm_extension_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_resource",
            "error_description": "AADSTS50001: The application was not found"
        })))
        .mount(&server)
        .await;

    let creds = MsiVmTokenCredentials::new(MsiVmOptions {
        port: server.address().port(),
        resource: "https://unknown.example.com/".to_string(),
        ..MsiVmOptions::default()
    })
    .unwrap();

    match creds.get_token().await.unwrap_err() {
        AuthError::TokenEndpoint { error, .. } => assert_eq!(error, "invalid_resource"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_app_service_token_and_signing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MSI/token/"))
        .and(header("secret", SECRET))
        .and(query_param("resource", "https://vault.azure.net"))
        .and(query_param("api-version", "2017-09-01"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"access_token":"app-token","expires_on":"06/20/2019 02:57:58 +00:00","resource":"https://vault.azure.net","token_type":"Bearer"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let creds: Credential = app_service(&server, "https://vault.azure.net").into();
    let request = reqwest::Request::new(reqwest::Method::GET, "https://myvault.vault.azure.net/secrets".parse().unwrap());
    let signed = creds.sign_request(request).await.unwrap();

    assert_eq!(signed.headers().get(AUTHORIZATION).unwrap(), "Bearer app-token");
    assert_eq!(creds.type_name(), "msi-app-service");
    assert!(creds.user().is_none());
}

#[tokio::test]
async fn test_app_service_exception_message_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MSI/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"ExceptionMessage":"Secret does not match","StackTrace":"..."}"#,
        ))
        .mount(&server)
        .await;

    let err = app_service(&server, "https://management.azure.com/")
        .get_token()
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MalformedResponse(_)));
    assert!(err.to_string().contains("Secret does not match"));
}

#[tokio::test]
async fn test_app_service_body_without_token_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/MSI/token/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token_type":"Bearer"}"#))
        .mount(&server)
        .await;

    let err = app_service(&server, "https://management.azure.com/")
        .get_token()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("did not find accessToken"));
}
