//! Event Grid domain key authentication

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use super::base::require_non_empty;
use crate::errors::{AuthError, Result};

/// Header the domain key is sent in
pub const DOMAIN_KEY_HEADER: &str = "aeg-sas-key";

/// Static key credentials for an Event Grid domain
#[derive(Clone)]
pub struct DomainCredentials {
    key: String,
}

impl std::fmt::Debug for DomainCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCredentials").field("key", &"<redacted>").finish()
    }
}

impl DomainCredentials {
    pub fn new(domain_key: impl Into<String>) -> Result<Self> {
        let key = domain_key.into();
        require_non_empty("domainKey", &key)?;
        Ok(Self { key })
    }

    /// Set the key header, replacing any previous value
    pub fn sign_headers(&self, headers: &mut HeaderMap) -> Result<()> {
        let mut value = HeaderValue::from_str(&self.key).map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(DOMAIN_KEY_HEADER), value);
        Ok(())
    }

    pub fn sign_request(&self, mut request: reqwest::Request) -> Result<reqwest::Request> {
        self.sign_headers(request.headers_mut())?;
        Ok(request)
    }
}
