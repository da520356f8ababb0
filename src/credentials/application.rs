//! Service principal authentication with a client secret

use tracing::{debug, warn};

use super::CredentialOptions;
use super::base::{TokenCredentialsBase, require_non_empty};
use crate::cache::CacheQuery;
use crate::errors::{AuthError, Result};
use crate::token::TokenResponse;

/// Service principal credentials
#[derive(Clone)]
pub struct ApplicationTokenCredentials {
    base: TokenCredentialsBase,
    secret: String,
}

impl std::fmt::Debug for ApplicationTokenCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationTokenCredentials")
            .field("base", &self.base)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl ApplicationTokenCredentials {
    /// Create service principal credentials
    ///
    /// # Arguments
    /// * `client_id` - Application (client) id
    /// * `domain` - Tenant id or domain the application is registered in
    /// * `secret` - Client secret
    pub fn new(client_id: &str, domain: &str, secret: &str, options: CredentialOptions) -> Result<Self> {
        require_non_empty("secret", secret)?;
        Ok(Self {
            base: TokenCredentialsBase::new(client_id, domain, options)?,
            secret: secret.to_string(),
        })
    }

    pub fn base(&self) -> &TokenCredentialsBase {
        &self.base
    }

    pub(crate) fn base_mut(&mut self) -> &mut TokenCredentialsBase {
        &mut self.base
    }

    /// Get a token from the cache, falling back to the client credentials grant
    pub async fn get_token(&self) -> Result<TokenResponse> {
        match self.get_token_from_cache().await {
            Ok(token) => Ok(token),
            Err(err) if err.is_internal() => Err(err),
            Err(err) => {
                debug!(client_id = %self.base.client_id(), reason = %err, "Acquiring token with client credentials");
                let token = self
                    .base
                    .authority()
                    .acquire_token_with_client_credentials(
                        &self.base.resource(),
                        self.base.client_id(),
                        &self.secret,
                    )
                    .await?;
                self.base.cache_token(&token, None);
                Ok(token)
            }
        }
    }

    /// Cache lookup that also clears out what made the lookup fail.
    ///
    /// The cache cannot tell an expired entry from a missing one, so every
    /// failed lookup removes all entries of this client. If that removal
    /// fails the stale token would stay in place, which is reported as an
    /// internal error instead of the lookup failure.
    async fn get_token_from_cache(&self) -> Result<TokenResponse> {
        match self.base.get_token_from_cache(None).await {
            Ok(token) => Ok(token),
            Err(err) => {
                let query = CacheQuery::for_client(self.base.client_id());
                match self.base.remove_invalid_items_from_cache(&query) {
                    Ok(removed) => {
                        if removed > 0 {
                            debug!(client_id = %self.base.client_id(), removed, "Removed stale tokens from cache");
                        }
                        Err(err)
                    }
                    Err(remove_err) => {
                        warn!(client_id = %self.base.client_id(), error = %remove_err, "Failed to remove stale tokens");
                        Err(AuthError::Internal(format!(
                            "critical failure while removing expired token for service principal from token cache. {}",
                            remove_err
                        )))
                    }
                }
            }
        }
    }
}
