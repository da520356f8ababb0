//! Azure CLI authentication
//!
//! Borrows the session of a logged-in `az` CLI. Tokens and subscription
//! details come from `az account ...` commands with JSON output.

use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::debug;

use crate::errors::{AuthError, Result};
use crate::subscriptions::User;
use crate::token::{TokenResponse, parse_instant};

/// Tokens closer than this to expiry are fetched again
pub const TOKEN_RENEWAL_MARGIN_SECS: i64 = 270;

/// Runs `az` commands
#[derive(Debug, Clone)]
pub struct AzCli {
    program: String,
}

impl Default for AzCli {
    fn default() -> Self {
        Self::new()
    }
}

impl AzCli {
    /// `az` resolved through PATH
    pub fn new() -> Self {
        Self {
            program: "az".to_string(),
        }
    }

    /// A specific executable, e.g. `/usr/bin/az` or `az.cmd`
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run `az <args> --output json` and parse stdout
    pub async fn exec(&self, args: &[&str]) -> Result<Value> {
        debug!(program = %self.program, args = ?args, "Running Azure CLI");

        let output = Command::new(&self.program)
            .args(args)
            .args(["--output", "json"])
            .output()
            .await
            .map_err(|e| {
                AuthError::Cli(format!(
                    "Failed to run {}. Is Azure CLI installed and in PATH? Error: {}",
                    self.program, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Cli(format!(
                "az {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }

    /// `az account get-access-token [-s <subscription>] [--resource <resource>]`
    pub async fn get_access_token(
        &self,
        subscription: Option<&str>,
        resource: Option<&str>,
    ) -> Result<CliAccessToken> {
        let mut args = vec!["account", "get-access-token"];
        if let Some(subscription) = subscription {
            args.extend(["-s", subscription]);
        }
        if let Some(resource) = resource {
            args.extend(["--resource", resource]);
        }

        let value = self.exec(&args).await.map_err(|e| {
            AuthError::Cli(format!(
                "An error occurred while getting credentials from Azure CLI: {}",
                e
            ))
        })?;
        CliAccessToken::from_value(value)
    }

    /// `az account show`
    pub async fn get_default_subscription(&self) -> Result<LinkedSubscription> {
        let value = self.exec(&["account", "show"]).await.map_err(|e| {
            AuthError::Cli(format!(
                "An error occurred while getting information about the current subscription from Azure CLI: {}",
                e
            ))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// `az account set -s <subscription>`
    pub async fn set_default_subscription(&self, subscription_id_or_name: &str) -> Result<()> {
        self.exec(&["account", "set", "-s", subscription_id_or_name])
            .await
            .map_err(|e| {
                AuthError::Cli(format!(
                    "An error occurred while setting the current subscription from Azure CLI: {}",
                    e
                ))
            })?;
        Ok(())
    }

    /// `az account list [--all] [--refresh]`
    pub async fn list_all_subscriptions(
        &self,
        options: ListAllSubscriptionOptions,
    ) -> Result<Vec<LinkedSubscription>> {
        let mut args = vec!["account", "list"];
        if options.all {
            args.push("--all");
        }
        if options.refresh {
            args.push("--refresh");
        }

        let value = self.exec(&args).await.map_err(|e| {
            AuthError::Cli(format!(
                "An error occurred while getting a list of all the subscription from Azure CLI: {}",
                e
            ))
        })?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Access token handed out by the CLI
#[derive(Debug, Clone, PartialEq)]
pub struct CliAccessToken {
    pub access_token: String,
    pub expires_on: DateTime<Utc>,
    /// Subscription the token was issued for
    pub subscription: String,
    pub tenant: String,
    pub token_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCliAccessToken {
    access_token: String,
    expires_on: Option<String>,
    /// Epoch seconds, only printed by newer CLI versions
    #[serde(rename = "expires_on", default)]
    expires_on_epoch: Option<Value>,
    #[serde(default)]
    subscription: String,
    #[serde(default)]
    tenant: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl CliAccessToken {
    pub fn from_value(value: Value) -> Result<Self> {
        let raw: RawCliAccessToken = serde_json::from_value(value)?;

        let expires_on = raw
            .expires_on_epoch
            .as_ref()
            .and_then(parse_instant)
            .or_else(|| raw.expires_on.as_deref().and_then(parse_cli_local_time))
            .ok_or_else(|| {
                AuthError::Cli(format!(
                    "Azure CLI returned an unreadable token expiry: {:?}",
                    raw.expires_on
                ))
            })?;

        Ok(Self {
            access_token: raw.access_token,
            expires_on,
            subscription: raw.subscription,
            tenant: raw.tenant,
            token_type: raw.token_type,
        })
    }

    fn expires_within_margin(&self) -> bool {
        (self.expires_on - Utc::now()).num_seconds() <= TOKEN_RENEWAL_MARGIN_SECS
    }
}

/// `expiresOn` is printed in local time: "2019-06-20 14:04:03.640452"
fn parse_cli_local_time(s: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// Subscription (account) as reported by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedSubscription {
    pub id: String,
    pub name: String,
    pub tenant_id: String,
    pub user: User,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub is_default: bool,
    /// `cloudName` in CLI output
    #[serde(alias = "cloudName", default)]
    pub environment_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Options for `az account list`
#[derive(Debug, Clone, Copy, Default)]
pub struct ListAllSubscriptionOptions {
    /// Include subscriptions that are not enabled
    pub all: bool,
    /// Fetch up-to-date subscriptions from the server
    pub refresh: bool,
}

/// Credentials backed by the Azure CLI session
#[derive(Debug)]
pub struct AzureCliCredentials {
    cli: AzCli,
    resource: Option<String>,
    subscription_info: LinkedSubscription,
    token_info: Mutex<HeldToken>,
}

/// Token plus the resource it was issued for (`None` is the CLI default)
#[derive(Debug, Clone)]
struct HeldToken {
    token: CliAccessToken,
    resource: Option<String>,
}

impl AzureCliCredentials {
    pub fn new(cli: AzCli, subscription_info: LinkedSubscription, token_info: CliAccessToken) -> Self {
        Self {
            cli,
            resource: None,
            subscription_info,
            token_info: Mutex::new(HeldToken {
                token: token_info,
                resource: None,
            }),
        }
    }

    /// Read the current (or the given) subscription and a token for it
    pub async fn create(cli: AzCli, subscription: Option<&str>) -> Result<Self> {
        let subscription_info = match subscription {
            Some(id_or_name) => {
                let value = cli.exec(&["account", "show", "-s", id_or_name]).await.map_err(|e| {
                    AuthError::Cli(format!(
                        "An error occurred while getting information about the current subscription from Azure CLI: {}",
                        e
                    ))
                })?;
                serde_json::from_value(value)?
            }
            None => cli.get_default_subscription().await?,
        };
        let token_info = cli.get_access_token(Some(&subscription_info.id), None).await?;

        debug!(subscription = %subscription_info.id, tenant = %token_info.tenant, "Created Azure CLI credentials");
        Ok(Self::new(cli, subscription_info, token_info))
    }

    /// Tokens for another resource, e.g. "https://vault.azure.net".
    /// The held token is replaced on the next `get_token`.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn cli(&self) -> &AzCli {
        &self.cli
    }

    pub fn subscription_info(&self) -> &LinkedSubscription {
        &self.subscription_info
    }

    /// Snapshot of the token currently held
    pub fn token_info(&self) -> CliAccessToken {
        self.lock_token().token.clone()
    }

    /// Return the held token, fetching a new one from the CLI when it is
    /// about to expire or was issued for another subscription or resource
    pub async fn get_token(&self) -> Result<TokenResponse> {
        let held = self.lock_token().clone();
        let current = held.token;
        let token = if current.expires_within_margin()
            || current.subscription != self.subscription_info.id
            || held.resource != self.resource
        {
            debug!(subscription = %self.subscription_info.id, "Refreshing Azure CLI token");
            let fresh = self
                .cli
                .get_access_token(Some(&self.subscription_info.id), self.resource.as_deref())
                .await
                .map_err(|e| {
                    AuthError::Cli(format!(
                        "An error occurred while refreshing the new access token: {}",
                        e
                    ))
                })?;
            *self.lock_token() = HeldToken {
                token: fresh.clone(),
                resource: self.resource.clone(),
            };
            fresh
        } else {
            current
        };

        let mut response = TokenResponse::new(token.token_type, token.access_token);
        response.expires_on = Some(token.expires_on);
        response.tenant_id = Some(token.tenant);
        Ok(response)
    }

    fn lock_token(&self) -> std::sync::MutexGuard<'_, HeldToken> {
        self.token_info.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
