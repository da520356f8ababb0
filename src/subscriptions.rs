//! Tenant and subscription discovery
//!
//! After sign-in the credential is walked over every tenant it can see and the
//! subscriptions of each tenant are collected into [`SubscriptionInfo`]
//! records. Tenants are visited one at a time: the walk rebinds the
//! credential's domain per tenant and puts the original back when it is done.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::credentials::Credential;
use crate::errors::{AuthError, Result};

/// api-version of the tenants and subscriptions endpoints
pub const DEFAULT_API_VERSION: &str = "2016-06-01";

/// Kind of principal a subscription was discovered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserType {
    User,
    ServicePrincipal,
}

/// Who the subscription was discovered for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Username, or the client id of a service principal
    pub name: String,
    #[serde(rename = "type")]
    pub user_type: UserType,
}

/// A subscription found during authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    pub tenant_id: String,
    pub user: User,
    /// "AzureCloud", "AzureChinaCloud", ... or a custom environment name
    pub environment_name: String,
    /// Display name
    pub name: String,
    /// Subscription id, usually a guid
    pub id: String,
    /// Remaining fields returned by the service, e.g. `state`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SubscriptionInfo {
    /// Relabel a raw resource manager subscription entry
    fn from_raw(raw: Value, tenant_id: &str, user: &User, environment_name: &str) -> Result<Self> {
        let mut fields = match raw {
            Value::Object(fields) => fields,
            other => {
                return Err(AuthError::MalformedResponse(format!(
                    "subscription entry is not an object: {}",
                    other
                )));
            }
        };

        let name = take_string(&mut fields, "displayName");
        let id = take_string(&mut fields, "subscriptionId");
        for key in ["subscriptionPolicies", "tenantId", "user", "environmentName", "name", "id"] {
            fields.remove(key);
        }

        Ok(Self {
            tenant_id: tenant_id.to_string(),
            user: user.clone(),
            environment_name: environment_name.to_string(),
            name,
            id,
            extra: fields,
        })
    }
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> String {
    match fields.remove(key) {
        Some(Value::String(s)) => s,
        Some(other) if !other.is_null() => other.to_string(),
        _ => String::new(),
    }
}

/// Tenants to walk: the credential's own domain, or every tenant it can list
pub async fn build_tenant_list(credential: &Credential, api_version: &str) -> Result<Vec<String>> {
    let base = credential.directory().ok_or_else(|| unsupported(credential))?;

    if base.has_specific_tenant() {
        return Ok(vec![base.domain().to_string()]);
    }

    let url = base
        .environment()
        .resource_manager_url(&format!("tenants?api-version={}", api_version));
    let body = get_json(credential, &url).await?;

    let tenants: Vec<String> = body
        .get("value")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|t| t.get("tenantId").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    debug!(count = tenants.len(), "Listed tenants");
    Ok(tenants)
}

/// Collect the subscriptions of every tenant in `tenants`.
///
/// The credential's domain is rebound per tenant and restored before this
/// returns, whether the walk succeeds or not. The first failing tenant aborts
/// the walk and nothing collected so far is returned.
pub async fn get_subscriptions_from_tenants(
    credential: &mut Credential,
    tenants: &[String],
    api_version: &str,
) -> Result<Vec<SubscriptionInfo>> {
    let user = credential.user().ok_or_else(|| unsupported(credential))?;
    let original = credential
        .domain()
        .map(String::from)
        .ok_or_else(|| unsupported(credential))?;

    let mut guard = DomainGuard {
        credential,
        original,
    };
    let mut subscriptions = Vec::new();

    for tenant in tenants {
        let (url, environment_name) = match guard.credential.directory_mut() {
            Some(base) => {
                base.set_domain(tenant.clone());
                (
                    base.environment()
                        .resource_manager_url(&format!("subscriptions?api-version={}", api_version)),
                    base.environment().name.clone(),
                )
            }
            None => return Err(unsupported(&*guard.credential)),
        };

        let body = get_json(&*guard.credential, &url).await?;
        let entries = match body.get("value") {
            Some(Value::Array(entries)) => entries.clone(),
            _ => Vec::new(),
        };

        debug!(tenant = %tenant, count = entries.len(), "Listed subscriptions");
        for raw in entries {
            subscriptions.push(SubscriptionInfo::from_raw(raw, tenant, &user, &environment_name)?);
        }
    }

    info!(tenants = tenants.len(), subscriptions = subscriptions.len(), "Subscription discovery finished");
    Ok(subscriptions)
}

/// Puts the credential's original domain back when dropped
struct DomainGuard<'a> {
    credential: &'a mut Credential,
    original: String,
}

impl Drop for DomainGuard<'_> {
    fn drop(&mut self) {
        if let Some(base) = self.credential.directory_mut() {
            base.set_domain(std::mem::take(&mut self.original));
        }
    }
}

/// Signed GET against the resource manager
async fn get_json(credential: &Credential, url: &str) -> Result<Value> {
    let base = credential.directory().ok_or_else(|| unsupported(credential))?;
    let http = base.http_client();

    let request = http.get(url).build()?;
    let request = credential.sign_request(request).await?;
    let response = http.execute(request).await?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(AuthError::ResourceManager {
            status: status.as_u16(),
            body,
        });
    }

    Ok(serde_json::from_str(&body)?)
}

fn unsupported(credential: &Credential) -> AuthError {
    AuthError::Argument(format!(
        "{} credentials are not bound to a directory tenant",
        credential.type_name()
    ))
}
