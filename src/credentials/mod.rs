//! Credentials
//!
//! Every way of obtaining a token is a variant of [`Credential`]. The kind is
//! chosen when the credential is built; acquisition and request signing then
//! dispatch on the variant:
//! - [`ApplicationTokenCredentials`] - service principal with a client secret
//! - [`UserTokenCredentials`] - organizational account username/password
//! - [`DeviceTokenCredentials`] - interactive device code sign-in
//! - [`ManagedIdentityCredentials`] - VM metadata service or App Service endpoint
//! - [`AzureCliCredentials`] - tokens handed out by a logged-in `az` CLI

mod application;
mod base;
mod cli;
mod device;
mod domain;
mod msi;
mod user;

pub use application::ApplicationTokenCredentials;
pub use base::{AAD_COMMON_TENANT, EXPIRATION_MARGIN, TokenCredentialsBase};
pub use cli::{AzCli, AzureCliCredentials, CliAccessToken, LinkedSubscription, ListAllSubscriptionOptions};
pub use device::{DEFAULT_LANGUAGE, DeviceTokenCredentials, UNKNOWN_USER, UserCodePrompt, default_user_code_prompt};
pub use domain::DomainCredentials;
pub use msi::{
    DEFAULT_MSI_API_VERSION, DEFAULT_MSI_PORT, DEFAULT_MSI_RESOURCE, ManagedIdentityCredentials,
    MsiAppServiceOptions, MsiAppServiceTokenCredentials, MsiVmOptions, MsiVmTokenCredentials,
};
pub use user::UserTokenCredentials;

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::aad::default_http_client;
use crate::cache::{MemoryCache, TokenCache};
use crate::environment::AzureEnvironment;
use crate::errors::{AuthError, Result};
use crate::subscriptions::{User, UserType};
use crate::token::{AccessToken, TokenResponse};

/// Client id of the Azure CLI, registered in every tenant as a public client
pub const DEFAULT_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

/// The audience a token is requested for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenAudience {
    /// The directory graph of the environment
    Graph,
    /// Azure Batch
    Batch,
    /// Any other resource URI, e.g. "https://vault.azure.net"
    Resource(String),
}

impl TokenAudience {
    pub fn resource_id(&self, environment: &AzureEnvironment) -> String {
        match self {
            TokenAudience::Graph => environment.active_directory_graph_resource_id.clone(),
            TokenAudience::Batch => "https://batch.core.windows.net/".to_string(),
            TokenAudience::Resource(resource) => resource.clone(),
        }
    }
}

impl From<&str> for TokenAudience {
    fn from(value: &str) -> Self {
        match value {
            "graph" => TokenAudience::Graph,
            "batch" => TokenAudience::Batch,
            other => TokenAudience::Resource(other.to_string()),
        }
    }
}

/// Options shared by directory-backed credentials
#[derive(Debug, Clone)]
pub struct CredentialOptions {
    pub token_audience: Option<TokenAudience>,
    pub environment: AzureEnvironment,
    pub token_cache: Arc<dyn TokenCache>,
    pub http_client: reqwest::Client,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            token_audience: None,
            environment: AzureEnvironment::default(),
            token_cache: MemoryCache::shared(),
            http_client: default_http_client(),
        }
    }
}

/// Credential sum type
#[derive(Debug)]
pub enum Credential {
    /// Service principal with a client secret
    Secret(ApplicationTokenCredentials),
    /// Organizational account username and password
    Password(UserTokenCredentials),
    /// Interactive device code sign-in
    DeviceCode(DeviceTokenCredentials),
    /// Managed identity
    ManagedIdentity(ManagedIdentityCredentials),
    /// Azure CLI
    Cli(AzureCliCredentials),
}

impl Credential {
    /// Get a token, from cache when possible
    pub async fn get_token(&self) -> Result<TokenResponse> {
        match self {
            Credential::Secret(creds) => creds.get_token().await,
            Credential::Password(creds) => creds.get_token().await,
            Credential::DeviceCode(creds) => creds.get_token().await,
            Credential::ManagedIdentity(creds) => creds.get_token().await,
            Credential::Cli(creds) => creds.get_token().await,
        }
    }

    /// Get a token in the bearer-pipeline shape
    pub async fn get_access_token(&self) -> Result<AccessToken> {
        let token = self.get_token().await?;
        Ok(AccessToken::from(&token))
    }

    /// Set `Authorization: <tokenType> <accessToken>` on a header map
    pub async fn sign_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        let token = self.get_token().await?;
        headers.insert(AUTHORIZATION, authorization_value(&token)?);
        Ok(())
    }

    /// Sign an outgoing request and hand it back
    pub async fn sign_request(&self, mut request: reqwest::Request) -> Result<reqwest::Request> {
        self.sign_headers(request.headers_mut()).await?;
        Ok(request)
    }

    /// Directory state for kinds that authenticate against a tenant authority
    pub fn directory(&self) -> Option<&TokenCredentialsBase> {
        match self {
            Credential::Secret(creds) => Some(creds.base()),
            Credential::Password(creds) => Some(creds.base()),
            Credential::DeviceCode(creds) => Some(creds.base()),
            Credential::ManagedIdentity(_) | Credential::Cli(_) => None,
        }
    }

    pub(crate) fn directory_mut(&mut self) -> Option<&mut TokenCredentialsBase> {
        match self {
            Credential::Secret(creds) => Some(creds.base_mut()),
            Credential::Password(creds) => Some(creds.base_mut()),
            Credential::DeviceCode(creds) => Some(creds.base_mut()),
            Credential::ManagedIdentity(_) | Credential::Cli(_) => None,
        }
    }

    /// Current domain (tenant) of directory-backed kinds
    pub fn domain(&self) -> Option<&str> {
        self.directory().map(|base| base.domain())
    }

    /// Who the credential authenticates as, for subscription records
    pub fn user(&self) -> Option<User> {
        match self {
            Credential::Secret(creds) => Some(User {
                name: creds.base().client_id().to_string(),
                user_type: UserType::ServicePrincipal,
            }),
            Credential::Password(creds) => Some(User {
                name: creds.username().to_string(),
                user_type: UserType::User,
            }),
            Credential::DeviceCode(creds) => Some(User {
                name: creds.signed_in_user(),
                user_type: UserType::User,
            }),
            Credential::Cli(creds) => Some(creds.subscription_info().user.clone()),
            Credential::ManagedIdentity(_) => None,
        }
    }

    /// Credential kind name for display/debugging
    pub fn type_name(&self) -> &'static str {
        match self {
            Credential::Secret(_) => "service-principal-secret",
            Credential::Password(_) => "username-password",
            Credential::DeviceCode(_) => "device-code",
            Credential::ManagedIdentity(ManagedIdentityCredentials::Vm(_)) => "msi-vm",
            Credential::ManagedIdentity(ManagedIdentityCredentials::AppService(_)) => "msi-app-service",
            Credential::Cli(_) => "azure-cli",
        }
    }
}

impl From<ApplicationTokenCredentials> for Credential {
    fn from(creds: ApplicationTokenCredentials) -> Self {
        Credential::Secret(creds)
    }
}

impl From<UserTokenCredentials> for Credential {
    fn from(creds: UserTokenCredentials) -> Self {
        Credential::Password(creds)
    }
}

impl From<DeviceTokenCredentials> for Credential {
    fn from(creds: DeviceTokenCredentials) -> Self {
        Credential::DeviceCode(creds)
    }
}

impl From<ManagedIdentityCredentials> for Credential {
    fn from(creds: ManagedIdentityCredentials) -> Self {
        Credential::ManagedIdentity(creds)
    }
}

impl From<MsiVmTokenCredentials> for Credential {
    fn from(creds: MsiVmTokenCredentials) -> Self {
        Credential::ManagedIdentity(ManagedIdentityCredentials::Vm(creds))
    }
}

impl From<MsiAppServiceTokenCredentials> for Credential {
    fn from(creds: MsiAppServiceTokenCredentials) -> Self {
        Credential::ManagedIdentity(ManagedIdentityCredentials::AppService(creds))
    }
}

impl From<AzureCliCredentials> for Credential {
    fn from(creds: AzureCliCredentials) -> Self {
        Credential::Cli(creds)
    }
}

/// Authorization header value for a token, marked sensitive
pub(crate) fn authorization_value(token: &TokenResponse) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&token.authorization_header())
        .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
    value.set_sensitive(true);
    Ok(value)
}
