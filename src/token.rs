//! Token records
//!
//! Every acquisition path (directory token endpoint, managed identity,
//! Azure CLI) ends in the same canonical [`TokenResponse`]. The raw bodies
//! use snake_case fields with numbers that are sometimes strings, so the
//! parser here is deliberately lenient about representation and strict about
//! the two fields that matter: the token type and the access token.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::errors::{AuthError, Result};

/// Canonical token record
#[derive(Debug, Clone, PartialEq)]
pub struct TokenResponse {
    /// Token type, usually "Bearer"
    pub token_type: String,
    /// The access token
    pub access_token: String,
    /// Expiry instant
    pub expires_on: Option<DateTime<Utc>>,
    /// Lifetime in seconds as reported by the issuer
    pub expires_in: Option<u64>,
    /// Start of validity
    pub not_before: Option<DateTime<Utc>>,
    /// Refresh token (directory flows only)
    pub refresh_token: Option<String>,
    /// Resource the token is scoped to
    pub resource: Option<String>,
    /// Signed-in user, taken from the id token
    pub user_id: Option<String>,
    /// Tenant that issued the token
    pub tenant_id: Option<String>,
    /// Fields we do not model
    pub extra: Map<String, Value>,
}

impl TokenResponse {
    /// Create a minimal token record
    pub fn new(token_type: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            token_type: token_type.into(),
            access_token: access_token.into(),
            expires_on: None,
            expires_in: None,
            not_before: None,
            refresh_token: None,
            resource: None,
            user_id: None,
            tenant_id: None,
            extra: Map::new(),
        }
    }

    /// Parse a raw token body (snake_case or camelCase fields)
    pub fn from_body(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body).map_err(|e| {
            AuthError::MalformedResponse(format!(
                "Invalid token response, body is not JSON ({}). Response body is: {}",
                e, body
            ))
        })?;

        let Value::Object(mut fields) = value else {
            return Err(AuthError::MalformedResponse(format!(
                "Invalid token response, expected a JSON object. Response body is: {}",
                body
            )));
        };

        let token_type = take_string(&mut fields, &["token_type", "tokenType"]).ok_or_else(|| {
            AuthError::MalformedResponse(format!(
                "Invalid token response, did not find tokenType. Response body is: {}",
                body
            ))
        })?;
        let access_token = take_string(&mut fields, &["access_token", "accessToken"]).ok_or_else(|| {
            AuthError::MalformedResponse(format!(
                "Invalid token response, did not find accessToken. Response body is: {}",
                body
            ))
        })?;

        let expires_on = take_value(&mut fields, &["expires_on", "expiresOn"]).and_then(|v| {
            let parsed = parse_instant(&v);
            if parsed.is_none() {
                warn!(value = %v, "Ignoring unparsable token expiry");
            }
            parsed
        });
        let expires_in = take_value(&mut fields, &["expires_in", "expiresIn"]).and_then(|v| as_u64(&v));
        let not_before = take_value(&mut fields, &["not_before", "notBefore"]).and_then(|v| parse_instant(&v));
        let refresh_token = take_string(&mut fields, &["refresh_token", "refreshToken"])
            .filter(|t| !t.is_empty());
        let resource = take_string(&mut fields, &["resource"]);
        let claims = take_string(&mut fields, &["id_token", "idToken"])
            .and_then(|t| IdTokenClaims::decode(&t));

        let mut tenant_id = take_string(&mut fields, &["tenant_id", "tenantId"]);
        let mut user_id = take_string(&mut fields, &["user_id", "userId"]);
        if let Some(claims) = claims {
            user_id = user_id.or_else(|| claims.user_id());
            tenant_id = tenant_id.or(claims.tid);
        }

        Ok(Self {
            token_type,
            access_token,
            expires_on,
            expires_in,
            not_before,
            refresh_token,
            resource,
            user_id,
            tenant_id,
            extra: fields,
        })
    }

    /// Value for the Authorization header: "<tokenType> <accessToken>"
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Whether the token expires within `margin` from now.
    ///
    /// Tokens without a known expiry never count as expiring.
    pub fn expires_within(&self, margin: Duration) -> bool {
        match self.expires_on {
            Some(expires_on) => {
                let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
                expires_on - margin <= Utc::now()
            }
            None => false,
        }
    }
}

/// Bearer token in the shape pipelines consume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub token: String,
    /// Expiry in epoch milliseconds, 0 when unknown
    pub expires_on_timestamp: i64,
}

impl From<&TokenResponse> for AccessToken {
    fn from(token: &TokenResponse) -> Self {
        Self {
            token: token.access_token.clone(),
            expires_on_timestamp: token.expires_on.map(|t| t.timestamp_millis()).unwrap_or(0),
        }
    }
}

/// The subset of id token claims used to identify the signed-in user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTokenClaims {
    pub upn: Option<String>,
    pub email: Option<String>,
    pub unique_name: Option<String>,
    pub sub: Option<String>,
    pub oid: Option<String>,
    pub tid: Option<String>,
}

impl IdTokenClaims {
    /// Decode the payload segment of a JWT without verifying its signature
    pub fn decode(id_token: &str) -> Option<Self> {
        let payload = id_token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Displayable user id, most specific claim first
    pub fn user_id(&self) -> Option<String> {
        self.upn
            .clone()
            .or_else(|| self.email.clone())
            .or_else(|| self.unique_name.clone())
            .or_else(|| self.sub.clone())
    }
}

fn take_value(fields: &mut Map<String, Value>, names: &[&str]) -> Option<Value> {
    names
        .iter()
        .find_map(|name| fields.remove(*name))
        .filter(|v| !v.is_null())
}

fn take_string(fields: &mut Map<String, Value>, names: &[&str]) -> Option<String> {
    match take_value(fields, names)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an instant given as epoch seconds (number or string) or as a date string
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => parse_instant_str(s),
        _ => None,
    }
}

fn parse_instant_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return Utc.timestamp_opt(secs, 0).single();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // App Service: "06/20/2019 02:57:58 +00:00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%m/%d/%Y %H:%M:%S %:z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%m/%d/%Y %I:%M:%S %p %:z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
