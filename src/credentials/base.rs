//! State shared by directory-backed credentials
//!
//! Secret, password and device code credentials all authenticate against a
//! tenant authority and keep their tokens in a [`TokenCache`]. The cache side
//! of the acquisition protocol lives here; each credential adds its own
//! network exchange on top.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{CredentialOptions, TokenAudience};
use crate::aad::Authority;
use crate::cache::{CacheEntry, CacheQuery, TokenCache};
use crate::environment::AzureEnvironment;
use crate::errors::{AuthError, Result};
use crate::token::TokenResponse;

/// The tenant placeholder that lets any tenant authenticate the user
pub const AAD_COMMON_TENANT: &str = "common";

/// Cached tokens expiring sooner than this are treated as stale
pub const EXPIRATION_MARGIN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct TokenCredentialsBase {
    client_id: String,
    domain: String,
    token_audience: Option<TokenAudience>,
    environment: AzureEnvironment,
    token_cache: Arc<dyn TokenCache>,
    http: reqwest::Client,
}

impl TokenCredentialsBase {
    pub fn new(client_id: &str, domain: &str, options: CredentialOptions) -> Result<Self> {
        require_non_empty("clientId", client_id)?;
        require_non_empty("domain", domain)?;

        if options.token_audience == Some(TokenAudience::Graph)
            && domain.eq_ignore_ascii_case(AAD_COMMON_TENANT)
        {
            return Err(AuthError::Argument(
                "If the tokenAudience is specified as \"graph\" then \"domain\" cannot be defaulted to \"common\" tenant. \
                 It must be the actual tenant (preferably a string in a guid format)."
                    .to_string(),
            ));
        }

        Ok(Self {
            client_id: client_id.to_string(),
            domain: domain.to_string(),
            token_audience: options.token_audience,
            environment: options.environment,
            token_cache: options.token_cache,
            http: options.http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub(crate) fn set_domain(&mut self, domain: String) {
        self.domain = domain;
    }

    pub fn token_audience(&self) -> Option<&TokenAudience> {
        self.token_audience.as_ref()
    }

    pub fn environment(&self) -> &AzureEnvironment {
        &self.environment
    }

    pub fn token_cache(&self) -> &Arc<dyn TokenCache> {
        &self.token_cache
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http
    }

    /// Whether the domain names a specific tenant rather than `common`
    pub fn has_specific_tenant(&self) -> bool {
        !self.domain.eq_ignore_ascii_case(AAD_COMMON_TENANT)
    }

    /// The resource tokens are requested for
    pub fn resource(&self) -> String {
        match &self.token_audience {
            None => self.environment.active_directory_resource_id.clone(),
            Some(audience) => audience.resource_id(&self.environment),
        }
    }

    /// Authority for the current domain
    pub fn authority(&self) -> Authority {
        Authority::new(self.environment.authority(&self.domain), self.http.clone())
    }

    /// Copy bound to another authority URL and resource, sharing the cache
    pub(crate) fn scoped(&self, authority: &str, resource: &str) -> Result<Self> {
        let url = url::Url::parse(authority)?;
        let tenant = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| AuthError::Argument(format!("authority \"{}\" does not name a tenant", authority)))?;

        let mut scoped = self.clone();
        scoped.environment.active_directory_endpoint_url = format!("{}/", url.origin().ascii_serialization());
        scoped.domain = tenant.to_string();
        scoped.token_audience = Some(TokenAudience::Resource(resource.to_string()));
        Ok(scoped)
    }

    /// Query selecting the cache entries this credential would use
    pub fn cache_query(&self, user_id: Option<&str>) -> CacheQuery {
        CacheQuery {
            authority: Some(self.environment.authority(&self.domain)),
            client_id: Some(self.client_id.clone()),
            resource: Some(self.resource()),
            user_id: user_id.map(String::from),
        }
    }

    /// Look the token up in the cache.
    ///
    /// A stale entry holding a refresh token is renewed in place. When the
    /// exact entry is missing, a refresh token issued to the same client
    /// (and user) for another tenant or resource is redeemed against the
    /// current authority. Anything else is [`AuthError::CacheMiss`].
    pub async fn get_token_from_cache(&self, user_id: Option<&str>) -> Result<TokenResponse> {
        let query = self.cache_query(user_id);
        let entries = self.token_cache.find(&query)?;

        if let Some(entry) = entries
            .iter()
            .find(|e| !e.token.expires_within(EXPIRATION_MARGIN))
        {
            debug!(client_id = %self.client_id, domain = %self.domain, "Token cache hit");
            return Ok(entry.token.clone());
        }

        if let Some(stale) = entries.iter().find(|e| e.token.refresh_token.is_some()) {
            debug!(client_id = %self.client_id, domain = %self.domain, "Refreshing stale cached token");
            let token = self.redeem_refresh_token(stale).await?;
            self.token_cache.remove(std::slice::from_ref(stale))?;
            self.cache_token(&token, stale.user_id.as_deref());
            return Ok(token);
        }

        if entries.is_empty() {
            let related = CacheQuery {
                client_id: Some(self.client_id.clone()),
                user_id: user_id.map(String::from),
                ..CacheQuery::default()
            };
            let candidates = self.token_cache.find(&related)?;
            if let Some(entry) = candidates.iter().find(|e| e.token.refresh_token.is_some()) {
                debug!(
                    client_id = %self.client_id,
                    domain = %self.domain,
                    from = %entry.authority,
                    "Redeeming refresh token issued for another tenant or resource"
                );
                let token = self.redeem_refresh_token(entry).await?;
                self.cache_token(&token, entry.user_id.as_deref());
                return Ok(token);
            }
        }

        Err(AuthError::CacheMiss)
    }

    async fn redeem_refresh_token(&self, entry: &CacheEntry) -> Result<TokenResponse> {
        let refresh_token = entry.token.refresh_token.as_deref().ok_or(AuthError::CacheMiss)?;
        let mut token = self
            .authority()
            .acquire_token_with_refresh_token(&self.resource(), &self.client_id, refresh_token, None)
            .await?;
        if token.user_id.is_none() {
            token.user_id = entry.user_id.clone();
        }
        Ok(token)
    }

    /// Store a freshly issued token. A failing cache does not fail the acquisition.
    pub fn cache_token(&self, token: &TokenResponse, user_id: Option<&str>) {
        let entry = CacheEntry {
            authority: self.environment.authority(&self.domain),
            client_id: self.client_id.clone(),
            resource: self.resource(),
            user_id: user_id.map(String::from).or_else(|| token.user_id.clone()),
            token: token.clone(),
        };
        if let Err(e) = self.token_cache.add(vec![entry]) {
            warn!(error = %e, client_id = %self.client_id, "Failed to store token in cache");
        }
    }

    /// Remove every entry matching `query`. Removing nothing is success.
    pub fn remove_invalid_items_from_cache(&self, query: &CacheQuery) -> Result<usize> {
        let entries = self.token_cache.find(query)?;
        if entries.is_empty() {
            return Ok(0);
        }
        self.token_cache.remove(&entries)?;
        Ok(entries.len())
    }
}

pub(crate) fn require_non_empty(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AuthError::Argument(format!("{} must be a non empty string.", name)));
    }
    Ok(())
}
