//! Key Vault challenge authentication
//!
//! Key Vault does not say up front which tenant and resource a token must be
//! issued for. The first unauthenticated request is answered with a 401 whose
//! `WWW-Authenticate` header names both:
//!
//! ```text
//! WWW-Authenticate: Bearer authorization="https://login.windows.net/<tenant>", resource="https://vault.azure.net"
//! ```
//!
//! The challenge is remembered per vault (`scheme://host[:port]`), a token is
//! obtained for it, and the request is sent again once.

use dashmap::DashMap;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use tracing::{debug, warn};
use url::Url;

use crate::aad::default_http_client;
use crate::credentials::{Credential, authorization_value};
use crate::errors::Result;
use crate::token::TokenResponse;

/// Parsed `WWW-Authenticate: Bearer ...` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Authority URL, including the tenant
    pub authorization: String,
    /// Resource the token must be issued for
    pub resource: String,
    pub scope: Option<String>,
}

impl Challenge {
    /// Parse a bearer challenge. Returns `None` for other schemes or when
    /// the authority or the resource is missing.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut authorization = None;
        let mut resource = None;
        let mut scope = None;

        for part in split_challenge_params(params) {
            if let Some((key, value)) = parse_param(&part) {
                match key.to_lowercase().as_str() {
                    "authorization" | "authorization_uri" => authorization = Some(value),
                    "resource" => resource = Some(value),
                    "scope" => scope = Some(value),
                    _ => {}
                }
            }
        }

        let resource = resource.or_else(|| {
            scope
                .as_deref()
                .map(|s| s.trim_end_matches("/.default").to_string())
        })?;

        Some(Challenge {
            authorization: authorization.filter(|a| !a.is_empty())?,
            resource,
            scope,
        })
    }
}

/// Split challenge parameters, keeping commas inside quoted values
fn split_challenge_params(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                if !current.trim().is_empty() {
                    parts.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

fn parse_param(s: &str) -> Option<(String, String)> {
    let (key, value) = s.split_once('=')?;
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    Some((key.trim().to_string(), value.to_string()))
}

/// Cache key for a request URL: `scheme://host[:port]`
pub fn challenge_authority(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{}://{}:{}", url.scheme(), host, port),
        (Some(host), None) => format!("{}://{}", url.scheme(), host),
        (None, _) => format!("{}:", url.scheme()),
    }
}

/// Credentials that authenticate Key Vault requests by challenge
#[derive(Debug)]
pub struct KeyVaultCredentials {
    credential: Credential,
    challenges: DashMap<String, Challenge>,
    http: reqwest::Client,
}

impl KeyVaultCredentials {
    pub fn new(credential: Credential) -> Self {
        let http = credential
            .directory()
            .map(|base| base.http_client().clone())
            .unwrap_or_else(default_http_client);
        Self {
            credential,
            challenges: DashMap::new(),
            http,
        }
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn cached_challenge(&self, url: &Url) -> Option<Challenge> {
        self.challenges
            .get(&challenge_authority(url))
            .map(|entry| entry.value().clone())
    }

    pub fn add_challenge(&self, url: &Url, challenge: Challenge) {
        self.challenges.insert(challenge_authority(url), challenge);
    }

    /// Get a token satisfying `challenge`
    pub async fn authorize(&self, challenge: &Challenge) -> Result<TokenResponse> {
        debug!(authority = %challenge.authorization, resource = %challenge.resource, "Answering Key Vault challenge");

        match &self.credential {
            Credential::Secret(creds) => {
                let mut creds = creds.clone();
                let scoped = creds.base().scoped(&challenge.authorization, &challenge.resource)?;
                *creds.base_mut() = scoped;
                creds.get_token().await
            }
            Credential::Password(creds) => {
                let mut creds = creds.clone();
                let scoped = creds.base().scoped(&challenge.authorization, &challenge.resource)?;
                *creds.base_mut() = scoped;
                creds.get_token().await
            }
            Credential::DeviceCode(creds) => {
                let mut creds = creds.clone();
                let scoped = creds.base().scoped(&challenge.authorization, &challenge.resource)?;
                *creds.base_mut() = scoped;
                creds.get_token().await
            }
            Credential::ManagedIdentity(creds) => creds.for_resource(&challenge.resource).get_token().await,
            Credential::Cli(creds) => creds.get_token().await,
        }
    }

    /// Authorize `request` with the challenge cached for its vault, if any
    pub async fn sign_request(&self, mut request: reqwest::Request) -> Result<reqwest::Request> {
        if let Some(challenge) = self.cached_challenge(request.url()) {
            let token = self.authorize(&challenge).await?;
            request.headers_mut().insert(AUTHORIZATION, authorization_value(&token)?);
        }
        Ok(request)
    }

    /// Send a request, answering a 401 challenge with one authorized retry
    pub async fn send(&self, request: reqwest::Request) -> Result<reqwest::Response> {
        let request = self.sign_request(request).await?;
        let retry = request.try_clone();
        let url = request.url().clone();

        let response = self.http.execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(Challenge::parse)
        {
            Some(challenge) => challenge,
            None => return Ok(response),
        };
        self.add_challenge(&url, challenge.clone());

        let Some(mut retry) = retry else {
            warn!(url = %url, "Request body cannot be replayed, returning the challenge response");
            return Ok(response);
        };

        let token = self.authorize(&challenge).await?;
        retry.headers_mut().insert(AUTHORIZATION, authorization_value(&token)?);
        Ok(self.http.execute(retry).await?)
    }
}

impl From<Credential> for KeyVaultCredentials {
    fn from(credential: Credential) -> Self {
        Self::new(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = Challenge::parse(
            r#"Bearer authorization="https://login.windows.net/72f988bf", resource="https://vault.azure.net""#,
        )
        .unwrap();
        assert_eq!(challenge.authorization, "https://login.windows.net/72f988bf");
        assert_eq!(challenge.resource, "https://vault.azure.net");
    }

    #[test]
    fn test_parse_authorization_uri_and_scope() {
        let challenge = Challenge::parse(
            r#"Bearer authorization_uri="https://login.microsoftonline.com/t1", scope="https://vault.azure.net/.default""#,
        )
        .unwrap();
        assert_eq!(challenge.authorization, "https://login.microsoftonline.com/t1");
        assert_eq!(challenge.resource, "https://vault.azure.net");
        assert_eq!(challenge.scope.as_deref(), Some("https://vault.azure.net/.default"));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(Challenge::parse(r#"Basic realm="vault""#).is_none());
        assert!(Challenge::parse("Bearer").is_none());
        assert!(Challenge::parse(r#"Bearer resource="https://vault.azure.net""#).is_none());
    }

    #[test]
    fn test_challenge_authority() {
        let url = Url::parse("https://myvault.vault.azure.net/secrets/s1?api-version=7.0").unwrap();
        assert_eq!(challenge_authority(&url), "https://myvault.vault.azure.net");

        let url = Url::parse("http://127.0.0.1:8443/keys").unwrap();
        assert_eq!(challenge_authority(&url), "http://127.0.0.1:8443");
    }

    #[test]
    fn test_challenge_cache_is_per_vault() {
        let creds = KeyVaultCredentials::new(
            crate::credentials::ApplicationTokenCredentials::new(
                "client",
                "tenant",
                "secret",
                crate::credentials::CredentialOptions::default(),
            )
            .unwrap()
            .into(),
        );
        let challenge = Challenge {
            authorization: "https://login.windows.net/t1".to_string(),
            resource: "https://vault.azure.net".to_string(),
            scope: None,
        };

        creds.add_challenge(&Url::parse("https://a.vault.azure.net/secrets/x").unwrap(), challenge.clone());
        assert_eq!(
            creds.cached_challenge(&Url::parse("https://a.vault.azure.net/keys/y").unwrap()),
            Some(challenge)
        );
        assert!(creds
            .cached_challenge(&Url::parse("https://b.vault.azure.net/keys/y").unwrap())
            .is_none());
    }
}
