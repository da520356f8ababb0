//! Azure Active Directory token endpoint
//!
//! Network exchanges against a tenant authority (`<login endpoint><tenant>`):
//! - client credentials grant (service principal + secret)
//! - resource owner password grant
//! - refresh token grant
//! - device code flow (user code request + polling)

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, info};

use crate::errors::{AuthError, Result};
use crate::token::TokenResponse;

/// Fixed backoff between device code polls while authorization is pending
pub const DEVICE_CODE_POLL_INTERVAL: Duration = Duration::from_secs(1);

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to create HTTP client")
});

/// The process-wide HTTP client used when a credential is not given one
pub fn default_http_client() -> reqwest::Client {
    HTTP_CLIENT.clone()
}

/// OAuth 2.0 error response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenError {
    pub error: String,
    pub error_description: Option<String>,
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        AuthError::TokenEndpoint {
            error: err.error,
            description: err.error_description,
        }
    }
}

/// User code issued for the device code flow
#[derive(Debug, Clone, Deserialize)]
pub struct UserCodeInfo {
    pub user_code: String,
    pub device_code: String,
    #[serde(alias = "verification_uri")]
    pub verification_url: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub expires_in: u64,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub interval: Option<u64>,
    /// Human readable instructions, localized by the service
    #[serde(default)]
    pub message: String,
}

impl UserCodeInfo {
    /// The instructions to show the user, synthesized when the service sent none
    pub fn display_message(&self) -> String {
        if self.message.is_empty() {
            format!(
                "To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
                self.verification_url, self.user_code
            )
        } else {
            self.message.clone()
        }
    }
}

/// A tenant authority
#[derive(Debug, Clone)]
pub struct Authority {
    url: String,
    http: reqwest::Client,
}

impl Authority {
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.url)
    }

    pub fn device_code_endpoint(&self) -> String {
        format!("{}/oauth2/devicecode", self.url)
    }

    /// Client credentials grant
    pub async fn acquire_token_with_client_credentials(
        &self,
        resource: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<TokenResponse> {
        debug!(authority = %self.url, client_id, resource, "Requesting token with client credentials");
        self.request_token(&[
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("resource", resource),
        ])
        .await
    }

    /// Resource owner password grant
    pub async fn acquire_token_with_username_password(
        &self,
        resource: &str,
        username: &str,
        password: &str,
        client_id: &str,
    ) -> Result<TokenResponse> {
        debug!(authority = %self.url, client_id, resource, "Requesting token with username and password");
        self.request_token(&[
            ("grant_type", "password"),
            ("client_id", client_id),
            ("username", username),
            ("password", password),
            ("resource", resource),
            ("scope", "openid"),
        ])
        .await
    }

    /// Refresh token grant; keeps the old refresh token when no new one is issued
    pub async fn acquire_token_with_refresh_token(
        &self,
        resource: &str,
        client_id: &str,
        refresh_token: &str,
        client_secret: Option<&str>,
    ) -> Result<TokenResponse> {
        debug!(authority = %self.url, client_id, resource, "Refreshing token");
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("refresh_token", refresh_token),
            ("resource", resource),
        ];
        if let Some(secret) = client_secret {
            form.push(("client_secret", secret));
        }

        let mut token = self.request_token(&form).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    /// Request a user code for the device code flow
    pub async fn acquire_user_code(
        &self,
        resource: &str,
        client_id: &str,
        language: &str,
    ) -> Result<UserCodeInfo> {
        let mut url = url::Url::parse(&self.device_code_endpoint())?;
        url.query_pairs_mut().append_pair("mkt", language);

        let response = self
            .http
            .post(url)
            .form(&[("client_id", client_id), ("resource", resource)])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(endpoint_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|e| {
            AuthError::DeviceCode(format!("Failed to parse user code response: {}", e))
        })
    }

    /// Poll the token endpoint until the user completes the device code sign-in
    pub async fn acquire_token_with_device_code(
        &self,
        resource: &str,
        client_id: &str,
        user_code: &UserCodeInfo,
    ) -> Result<TokenResponse> {
        let start = Instant::now();
        let timeout = Duration::from_secs(user_code.expires_in);

        loop {
            if start.elapsed() > timeout {
                return Err(AuthError::DeviceCode("Device code expired".to_string()));
            }

            let response = self
                .http
                .post(self.token_endpoint())
                .form(&[
                    ("grant_type", "device_code"),
                    ("client_id", client_id),
                    ("resource", resource),
                    ("code", user_code.device_code.as_str()),
                ])
                .header("Accept", "application/json")
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;

            if status.is_success() {
                info!(authority = %self.url, "Device code authorization completed");
                return TokenResponse::from_body(&body);
            }

            let error: TokenError = match serde_json::from_str(&body) {
                Ok(error) => error,
                Err(_) => return Err(endpoint_error(status, &body)),
            };

            match error.error.as_str() {
                "authorization_pending" | "slow_down" => {
                    debug!(error = %error.error, "Authorization pending, polling again");
                    tokio::time::sleep(DEVICE_CODE_POLL_INTERVAL).await;
                }
                "expired_token" | "code_expired" => {
                    return Err(AuthError::DeviceCode("Device code expired".to_string()));
                }
                "access_denied" | "authorization_declined" => {
                    return Err(AuthError::DeviceCode("User denied authorization".to_string()));
                }
                _ => return Err(error.into()),
            }
        }
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.token_endpoint())
            .form(form)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!(status = %status, "Token endpoint responded");

        if !status.is_success() {
            return Err(endpoint_error(status, &body));
        }

        TokenResponse::from_body(&body)
    }
}

/// Turn a failed token endpoint response into an error, preferring the OAuth error body
pub(crate) fn endpoint_error(status: reqwest::StatusCode, body: &str) -> AuthError {
    match serde_json::from_str::<TokenError>(body) {
        Ok(error) => error.into(),
        Err(_) => AuthError::TokenEndpoint {
            error: format!("HTTP {}", status.as_u16()),
            description: (!body.is_empty()).then(|| body.to_string()),
        },
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_opt_u64(deserializer)?
        .ok_or_else(|| serde::de::Error::custom("expected a number or numeric string"))
}

fn lenient_opt_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}
