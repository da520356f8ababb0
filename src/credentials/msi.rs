//! Managed identity authentication
//!
//! Two hosts hand out tokens to the workload they run:
//! - a VM extension listening on localhost (POST, form body)
//! - the App Service identity endpoint (GET, shared secret header)
//!
//! Both answer with a snake_case token body that is normalized into a
//! [`TokenResponse`]. Nothing here is retried.

use tracing::debug;

use crate::aad::{default_http_client, endpoint_error};
use crate::config::MsiEnvironment;
use crate::errors::{AuthError, Result};
use crate::token::TokenResponse;

/// Port of the VM managed identity extension
pub const DEFAULT_MSI_PORT: u16 = 50342;

/// Resource tokens are requested for unless configured otherwise
pub const DEFAULT_MSI_RESOURCE: &str = "https://management.azure.com/";

/// api-version of the App Service identity endpoint
pub const DEFAULT_MSI_API_VERSION: &str = "2017-09-01";

/// Options for the VM managed identity extension
#[derive(Debug, Clone)]
pub struct MsiVmOptions {
    pub port: u16,
    pub resource: String,
    pub http_client: reqwest::Client,
}

impl Default for MsiVmOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_MSI_PORT,
            resource: DEFAULT_MSI_RESOURCE.to_string(),
            http_client: default_http_client(),
        }
    }
}

/// Options for the App Service identity endpoint
#[derive(Debug, Clone)]
pub struct MsiAppServiceOptions {
    /// Local URL tokens are requested from, e.g. "http://127.0.0.1:41741/MSI/token/"
    pub msi_endpoint: Option<String>,
    /// Secret shared between the app and the local agent
    pub msi_secret: Option<String>,
    pub msi_api_version: String,
    pub resource: String,
    pub http_client: reqwest::Client,
}

impl Default for MsiAppServiceOptions {
    fn default() -> Self {
        Self {
            msi_endpoint: None,
            msi_secret: None,
            msi_api_version: DEFAULT_MSI_API_VERSION.to_string(),
            resource: DEFAULT_MSI_RESOURCE.to_string(),
            http_client: default_http_client(),
        }
    }
}

impl MsiAppServiceOptions {
    /// Fill endpoint and secret from the process environment when unset
    pub fn with_environment(mut self, env: &MsiEnvironment) -> Self {
        if self.msi_endpoint.is_none() {
            self.msi_endpoint = env.endpoint.clone();
        }
        if self.msi_secret.is_none() {
            self.msi_secret = env.secret.clone();
        }
        self
    }
}

/// Token credentials from the VM managed identity extension
#[derive(Debug, Clone)]
pub struct MsiVmTokenCredentials {
    port: u16,
    resource: String,
    http: reqwest::Client,
}

impl MsiVmTokenCredentials {
    pub fn new(options: MsiVmOptions) -> Result<Self> {
        if options.port == 0 {
            return Err(AuthError::Argument("port must be a non zero number.".to_string()));
        }
        Ok(Self {
            port: options.port,
            resource: options.resource,
            http: options.http_client,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}/oauth2/token", self.port)
    }

    /// POST to the local extension for a token
    pub async fn get_token(&self) -> Result<TokenResponse> {
        let url = self.endpoint();
        debug!(url = %url, resource = %self.resource, "Requesting managed identity token from VM extension");

        let response = self
            .http
            .post(&url)
            .header("Metadata", "true")
            .form(&[("resource", self.resource.as_str())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(endpoint_error(status, &body));
        }

        TokenResponse::from_body(&body)
    }
}

/// Token credentials from the App Service identity endpoint
#[derive(Clone)]
pub struct MsiAppServiceTokenCredentials {
    msi_endpoint: String,
    msi_secret: String,
    msi_api_version: String,
    resource: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for MsiAppServiceTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsiAppServiceTokenCredentials")
            .field("msi_endpoint", &self.msi_endpoint)
            .field("msi_secret", &"<redacted>")
            .field("msi_api_version", &self.msi_api_version)
            .field("resource", &self.resource)
            .finish()
    }
}

impl MsiAppServiceTokenCredentials {
    pub fn new(options: MsiAppServiceOptions) -> Result<Self> {
        let msi_endpoint = options.msi_endpoint.filter(|e| !e.is_empty()).ok_or_else(|| {
            AuthError::Argument(
                "Either provide \"msiEndpoint\" in the options or set the environment variable \"MSI_ENDPOINT\"."
                    .to_string(),
            )
        })?;
        let msi_secret = options.msi_secret.filter(|s| !s.is_empty()).ok_or_else(|| {
            AuthError::Argument(
                "Either provide \"msiSecret\" in the options or set the environment variable \"MSI_SECRET\"."
                    .to_string(),
            )
        })?;
        if options.msi_api_version.is_empty() {
            return Err(AuthError::Argument("msiApiVersion must be a non empty string.".to_string()));
        }

        Ok(Self {
            msi_endpoint,
            msi_secret,
            msi_api_version: options.msi_api_version,
            resource: options.resource,
            http: options.http_client,
        })
    }

    /// Read endpoint and secret from `MSI_ENDPOINT` / `MSI_SECRET`
    pub fn from_env(options: MsiAppServiceOptions) -> Result<Self> {
        Self::new(options.with_environment(&MsiEnvironment::from_env()))
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn msi_endpoint(&self) -> &str {
        &self.msi_endpoint
    }

    /// `<endpoint>/?resource=<resource>&api-version=<version>`
    pub fn token_url(&self) -> Result<url::Url> {
        let endpoint = if self.msi_endpoint.ends_with('/') {
            self.msi_endpoint.clone()
        } else {
            format!("{}/", self.msi_endpoint)
        };
        let mut url = url::Url::parse(&endpoint)?;
        url.query_pairs_mut()
            .append_pair("resource", &self.resource)
            .append_pair("api-version", &self.msi_api_version);
        Ok(url)
    }

    /// GET a token from the identity endpoint
    pub async fn get_token(&self) -> Result<TokenResponse> {
        let url = self.token_url()?;
        debug!(url = %url, "Requesting managed identity token from App Service");

        let response = self
            .http
            .get(url.clone())
            .header("secret", &self.msi_secret)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if body.contains("ExceptionMessage") {
            return Err(AuthError::MalformedResponse(format!(
                "MSI: Failed to retrieve a token from \"{}\" with an error: {}",
                url, body
            )));
        }
        if !status.is_success() {
            return Err(endpoint_error(status, &body));
        }

        TokenResponse::from_body(&body)
    }
}

/// Managed identity host variants
#[derive(Debug, Clone)]
pub enum ManagedIdentityCredentials {
    Vm(MsiVmTokenCredentials),
    AppService(MsiAppServiceTokenCredentials),
}

impl ManagedIdentityCredentials {
    pub async fn get_token(&self) -> Result<TokenResponse> {
        match self {
            ManagedIdentityCredentials::Vm(creds) => creds.get_token().await,
            ManagedIdentityCredentials::AppService(creds) => creds.get_token().await,
        }
    }

    pub fn resource(&self) -> &str {
        match self {
            ManagedIdentityCredentials::Vm(creds) => creds.resource(),
            ManagedIdentityCredentials::AppService(creds) => creds.resource(),
        }
    }

    /// Same identity, scoped to another resource
    pub fn for_resource(&self, resource: &str) -> Self {
        match self {
            ManagedIdentityCredentials::Vm(creds) => {
                let mut creds = creds.clone();
                creds.resource = resource.to_string();
                ManagedIdentityCredentials::Vm(creds)
            }
            ManagedIdentityCredentials::AppService(creds) => {
                let mut creds = creds.clone();
                creds.resource = resource.to_string();
                ManagedIdentityCredentials::AppService(creds)
            }
        }
    }
}
