//! Organizational account authentication with username and password

use tracing::debug;

use super::CredentialOptions;
use super::base::{TokenCredentialsBase, require_non_empty};
use crate::errors::{AuthError, Result};
use crate::token::TokenResponse;

/// Username/password credentials
#[derive(Clone)]
pub struct UserTokenCredentials {
    base: TokenCredentialsBase,
    username: String,
    password: String,
}

impl std::fmt::Debug for UserTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserTokenCredentials")
            .field("base", &self.base)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl UserTokenCredentials {
    pub fn new(
        client_id: &str,
        domain: &str,
        username: &str,
        password: &str,
        options: CredentialOptions,
    ) -> Result<Self> {
        require_non_empty("clientId", client_id)?;
        require_non_empty("domain", domain)?;
        require_non_empty("username", username)?;
        require_non_empty("password", password)?;

        Ok(Self {
            base: TokenCredentialsBase::new(client_id, domain, options)?,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    pub fn base(&self) -> &TokenCredentialsBase {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut TokenCredentialsBase {
        &mut self.base
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get a token from the cache, falling back to the password grant.
    ///
    /// The token must belong to the requested user; the comparison ignores
    /// case because the directory may normalize the casing of the name.
    pub async fn get_token(&self) -> Result<TokenResponse> {
        match self.base.get_token_from_cache(Some(&self.username)).await {
            Ok(token) => Ok(token),
            Err(err) if err.is_internal() => Err(err),
            Err(err) => {
                debug!(username = %self.username, reason = %err, "Acquiring token with username and password");
                let token = self
                    .base
                    .authority()
                    .acquire_token_with_username_password(
                        &self.base.resource(),
                        &self.username,
                        &self.password,
                        self.base.client_id(),
                    )
                    .await?;

                check_token_user(&self.username, &token)?;
                self.base.cache_token(&token, None);
                Ok(token)
            }
        }
    }
}

pub(crate) fn check_token_user(username: &str, token: &TokenResponse) -> Result<()> {
    match token.user_id.as_deref() {
        Some(user_id) if user_id.to_lowercase() == username.to_lowercase() => Ok(()),
        other => Err(AuthError::IdentityMismatch {
            token_user: other.unwrap_or_default().to_string(),
            username: username.to_string(),
        }),
    }
}
