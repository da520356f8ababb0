//! One-call sign-in
//!
//! Each flow builds a credential, proves it by acquiring a token and, unless
//! the token is for the directory graph, lists the subscriptions it can see.

use tracing::info;

use crate::config::subscription_env_var;
use crate::credentials::{
    AAD_COMMON_TENANT, ApplicationTokenCredentials, AzCli, AzureCliCredentials, Credential, CredentialOptions,
    DEFAULT_CLIENT_ID, DEFAULT_LANGUAGE, DeviceTokenCredentials, MsiVmOptions, MsiVmTokenCredentials, TokenAudience,
    UserCodePrompt, UserTokenCredentials, default_user_code_prompt,
};
use crate::errors::Result;
use crate::subscriptions::{DEFAULT_API_VERSION, SubscriptionInfo, build_tenant_list, get_subscriptions_from_tenants};
use crate::token::TokenResponse;

/// Credential plus the subscriptions found while signing in
#[derive(Debug)]
pub struct AuthResponse {
    pub credentials: Credential,
    pub subscriptions: Vec<SubscriptionInfo>,
}

#[derive(Debug, Clone)]
pub struct ServicePrincipalOptions {
    pub credential: CredentialOptions,
    /// api-version of the subscriptions endpoint
    pub api_version: String,
}

impl Default for ServicePrincipalOptions {
    fn default() -> Self {
        Self {
            credential: CredentialOptions::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UsernamePasswordOptions {
    /// Defaults to the Azure CLI client id
    pub client_id: Option<String>,
    /// Defaults to `common`
    pub domain: Option<String>,
    pub credential: CredentialOptions,
    pub api_version: String,
}

impl Default for UsernamePasswordOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            domain: None,
            credential: CredentialOptions::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct InteractiveOptions {
    pub client_id: Option<String>,
    pub domain: Option<String>,
    /// Language of the sign-in instructions
    pub language: String,
    /// Receives the user code and instructions
    pub prompt: UserCodePrompt,
    pub credential: CredentialOptions,
    pub api_version: String,
}

impl std::fmt::Debug for InteractiveOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractiveOptions")
            .field("client_id", &self.client_id)
            .field("domain", &self.domain)
            .field("language", &self.language)
            .field("credential", &self.credential)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl Default for InteractiveOptions {
    fn default() -> Self {
        Self {
            client_id: None,
            domain: None,
            language: DEFAULT_LANGUAGE.to_string(),
            prompt: default_user_code_prompt(),
            credential: CredentialOptions::default(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

fn is_graph(options: &CredentialOptions) -> bool {
    options.token_audience == Some(TokenAudience::Graph)
}

/// Sign in as a service principal and list its subscriptions in `domain`
pub async fn with_service_principal_secret(
    client_id: &str,
    secret: &str,
    domain: &str,
    options: ServicePrincipalOptions,
) -> Result<AuthResponse> {
    let skip_walk = is_graph(&options.credential);
    let creds = ApplicationTokenCredentials::new(client_id, domain, secret, options.credential)?;
    creds.get_token().await?;

    let mut credentials = Credential::from(creds);
    let subscriptions = if skip_walk {
        Vec::new()
    } else {
        get_subscriptions_from_tenants(&mut credentials, &[domain.to_string()], &options.api_version).await?
    };

    info!(client_id, subscriptions = subscriptions.len(), "Signed in with service principal");
    Ok(AuthResponse {
        credentials,
        subscriptions,
    })
}

/// Sign in with an organizational account and list its subscriptions
pub async fn with_username_password(
    username: &str,
    password: &str,
    options: UsernamePasswordOptions,
) -> Result<AuthResponse> {
    let skip_walk = is_graph(&options.credential);
    let client_id = options.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID);
    let domain = options.domain.as_deref().unwrap_or(AAD_COMMON_TENANT);

    let creds = UserTokenCredentials::new(client_id, domain, username, password, options.credential)?;
    creds.get_token().await?;

    let mut credentials = Credential::from(creds);
    let subscriptions = walk(&mut credentials, skip_walk, &options.api_version).await?;

    info!(username, subscriptions = subscriptions.len(), "Signed in with username and password");
    Ok(AuthResponse {
        credentials,
        subscriptions,
    })
}

/// Sign in with the device code flow and list the user's subscriptions
pub async fn interactive(options: InteractiveOptions) -> Result<AuthResponse> {
    let skip_walk = is_graph(&options.credential);
    let client_id = options.client_id.as_deref().unwrap_or(DEFAULT_CLIENT_ID);
    let domain = options.domain.as_deref().unwrap_or(AAD_COMMON_TENANT);

    let sign_in = DeviceTokenCredentials::new(Some(client_id), Some(domain), None, options.credential.clone())?
        .with_language(options.language.clone())
        .with_prompt(options.prompt.clone());
    let token = sign_in.authenticate().await?;

    let creds = DeviceTokenCredentials::new(
        Some(client_id),
        Some(domain),
        token.user_id.as_deref(),
        options.credential,
    )?
    .with_language(options.language)
    .with_prompt(options.prompt);

    let mut credentials = Credential::from(creds);
    let subscriptions = walk(&mut credentials, skip_walk, &options.api_version).await?;

    info!(
        user = token.user_id.as_deref().unwrap_or_default(),
        subscriptions = subscriptions.len(),
        "Signed in with device code"
    );
    Ok(AuthResponse {
        credentials,
        subscriptions,
    })
}

/// Token from the VM managed identity extension
pub async fn with_msi(options: MsiVmOptions) -> Result<TokenResponse> {
    MsiVmTokenCredentials::new(options)?.get_token().await
}

/// Credentials from the logged-in Azure CLI.
///
/// Without an explicit subscription, `AZURE_SUBSCRIPTION_ID` is used when
/// set, otherwise the CLI's default subscription.
pub async fn with_azure_cli(subscription: Option<&str>) -> Result<AzureCliCredentials> {
    let from_env = subscription_env_var(None);
    let subscription = subscription.or(from_env.as_deref());
    AzureCliCredentials::create(AzCli::new(), subscription).await
}

async fn walk(credentials: &mut Credential, skip: bool, api_version: &str) -> Result<Vec<SubscriptionInfo>> {
    if skip {
        return Ok(Vec::new());
    }
    let tenants = build_tenant_list(credentials, api_version).await?;
    get_subscriptions_from_tenants(credentials, &tenants, api_version).await
}
