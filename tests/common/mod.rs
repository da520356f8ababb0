//! Common test utilities for azlogin integration tests
//!
//! - Cloud environments pointed at a wiremock server
//! - Token endpoint bodies and unsigned id tokens
//! - A token cache whose removals fail

#![allow(dead_code)]

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde_json::{Value, json};
use wiremock::MockServer;

use azlogin::cache::{CacheEntry, CacheQuery, MemoryCache, TokenCache};
use azlogin::{AuthError, AzureEnvironment, CredentialOptions, Result};

pub const CLIENT_ID: &str = "11111111-2222-3333-4444-555555555555";
pub const TENANT: &str = "72f988bf-86f1-41af-91ab-2d7cd011db47";
pub const USERNAME: &str = "someone@contoso.com";

/// Environment whose login and resource manager endpoints are `server`
pub fn environment(server: &MockServer) -> AzureEnvironment {
    AzureEnvironment::custom("TestCloud", server.uri(), server.uri())
}

/// Credential options against `server` with a private cache
pub fn options(server: &MockServer) -> CredentialOptions {
    CredentialOptions {
        environment: environment(server),
        ..CredentialOptions::default()
    }
}

pub fn options_with_cache(server: &MockServer, cache: Arc<dyn TokenCache>) -> CredentialOptions {
    CredentialOptions {
        token_cache: cache,
        ..options(server)
    }
}

pub fn token_path(tenant: &str) -> String {
    format!("/{}/oauth2/token", tenant)
}

/// Token endpoint success body valid for an hour
pub fn token_body(access_token: &str) -> Value {
    json!({
        "token_type": "Bearer",
        "access_token": access_token,
        "expires_in": "3600",
        "expires_on": (Utc::now().timestamp() + 3600).to_string(),
        "resource": "https://management.core.windows.net/"
    })
}

/// Token body for a signed-in user, with an id token naming `upn`
pub fn user_token_body(access_token: &str, upn: &str) -> Value {
    let mut body = token_body(access_token);
    body["id_token"] = json!(id_token(upn));
    body["refresh_token"] = json!(format!("refresh-{}", access_token));
    body
}

/// Unsigned JWT carrying `upn` and the test tenant
pub fn id_token(upn: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"typ":"JWT","alg":"none"}"#);
    let claims = URL_SAFE_NO_PAD.encode(json!({"upn": upn, "tid": TENANT}).to_string());
    format!("{}.{}.", header, claims)
}

pub fn oauth_error(error: &str) -> Value {
    json!({
        "error": error,
        "error_description": format!("AADSTS70016: {}", error)
    })
}

/// Cache whose removals always fail
#[derive(Debug, Default)]
pub struct FailingRemovalCache {
    inner: MemoryCache,
}

impl TokenCache for FailingRemovalCache {
    fn find(&self, query: &CacheQuery) -> Result<Vec<CacheEntry>> {
        self.inner.find(query)
    }

    fn add(&self, entries: Vec<CacheEntry>) -> Result<()> {
        self.inner.add(entries)
    }

    fn remove(&self, _entries: &[CacheEntry]) -> Result<()> {
        Err(AuthError::Cache("backing store is read-only".to_string()))
    }
}
