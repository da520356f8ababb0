//! Interactive device code authentication
//!
//! 1. Requests a user code from the tenant authority
//! 2. Hands the sign-in instructions to a prompt callback
//! 3. Polls the token endpoint until the user completes sign-in in a browser

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::base::{AAD_COMMON_TENANT, TokenCredentialsBase};
use super::{CredentialOptions, DEFAULT_CLIENT_ID};
use crate::aad::UserCodeInfo;
use crate::errors::Result;
use crate::token::TokenResponse;

/// Default language for the sign-in instructions
pub const DEFAULT_LANGUAGE: &str = "en-us";

/// Placeholder user for subscriptions found before anyone is known to have signed in
pub const UNKNOWN_USER: &str = "user@example.com";

/// Receives the user code and instructions during device code sign-in
pub type UserCodePrompt = Arc<dyn Fn(&UserCodeInfo) + Send + Sync>;

/// Prompt that logs the instructions and prints them to stderr
pub fn default_user_code_prompt() -> UserCodePrompt {
    Arc::new(|info: &UserCodeInfo| {
        info!(verification_url = %info.verification_url, "Waiting for device code sign-in");
        eprintln!("{}", info.display_message());
    })
}

/// Device code credentials
#[derive(Clone)]
pub struct DeviceTokenCredentials {
    base: TokenCredentialsBase,
    username: Option<String>,
    language: String,
    prompt: UserCodePrompt,
}

impl std::fmt::Debug for DeviceTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTokenCredentials")
            .field("base", &self.base)
            .field("username", &self.username)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl DeviceTokenCredentials {
    /// Create device code credentials.
    ///
    /// The client id defaults to the Azure CLI public client and the domain to
    /// `common`. Without a username, cached tokens of any user signed in
    /// through this client are accepted.
    pub fn new(
        client_id: Option<&str>,
        domain: Option<&str>,
        username: Option<&str>,
        options: CredentialOptions,
    ) -> Result<Self> {
        let client_id = client_id.filter(|c| !c.is_empty()).unwrap_or(DEFAULT_CLIENT_ID);
        let domain = domain.filter(|d| !d.is_empty()).unwrap_or(AAD_COMMON_TENANT);

        Ok(Self {
            base: TokenCredentialsBase::new(client_id, domain, options)?,
            username: username.filter(|u| !u.is_empty()).map(String::from),
            language: DEFAULT_LANGUAGE.to_string(),
            prompt: default_user_code_prompt(),
        })
    }

    /// Replace the prompt that shows the sign-in instructions
    pub fn with_prompt(mut self, prompt: UserCodePrompt) -> Self {
        self.prompt = prompt;
        self
    }

    /// Language the instructions are localized to
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn base(&self) -> &TokenCredentialsBase {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut TokenCredentialsBase {
        &mut self.base
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The configured username, else the user of a cached token, else
    /// [`UNKNOWN_USER`]
    pub fn signed_in_user(&self) -> String {
        if let Some(username) = &self.username {
            return username.clone();
        }
        self.base
            .token_cache()
            .find(&self.base.cache_query(None))
            .ok()
            .and_then(|entries| entries.into_iter().find_map(|e| e.user_id))
            .unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    /// Get a token from the cache, falling back to interactive sign-in
    pub async fn get_token(&self) -> Result<TokenResponse> {
        match self.base.get_token_from_cache(self.username.as_deref()).await {
            Ok(token) => Ok(token),
            Err(err) if err.is_internal() => Err(err),
            Err(err) => {
                debug!(reason = %err, "Starting device code sign-in");
                self.authenticate().await
            }
        }
    }

    /// Run the device code flow unconditionally and cache the result
    pub async fn authenticate(&self) -> Result<TokenResponse> {
        let authority = self.base.authority();
        let resource = self.base.resource();

        let user_code = authority
            .acquire_user_code(&resource, self.base.client_id(), &self.language)
            .await?;
        (self.prompt)(&user_code);

        let token = authority
            .acquire_token_with_device_code(&resource, self.base.client_id(), &user_code)
            .await?;

        if let (Some(expected), Some(actual)) = (self.username.as_deref(), token.user_id.as_deref()) {
            if expected.to_lowercase() != actual.to_lowercase() {
                warn!(expected, actual, "Device code sign-in completed for a different user");
            }
        }

        // tokens without id claims are filed under the configured user
        let user_id = token.user_id.as_deref().or(self.username.as_deref());
        self.base.cache_token(&token, user_id);
        Ok(token)
    }
}
