//! Process environment readers
//!
//! Credentials take explicit option structs; these helpers are the only
//! places that look at environment variables.

/// App Service managed identity endpoint
pub const MSI_ENDPOINT_VAR: &str = "MSI_ENDPOINT";
/// App Service managed identity secret
pub const MSI_SECRET_VAR: &str = "MSI_SECRET";
/// Turns on verbose logging when set
pub const LOGGING_ENABLED_VAR: &str = "AZURE_ADAL_LOGGING_ENABLED";
/// Default variable holding the subscription to work against
pub const SUBSCRIPTION_ID_VAR: &str = "AZURE_SUBSCRIPTION_ID";

/// Managed identity settings injected into App Service and Functions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MsiEnvironment {
    pub endpoint: Option<String>,
    pub secret: Option<String>,
}

impl MsiEnvironment {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            endpoint: non_empty(lookup(MSI_ENDPOINT_VAR)),
            secret: non_empty(lookup(MSI_SECRET_VAR)),
        }
    }

    /// Both values are present
    pub fn is_available(&self) -> bool {
        self.endpoint.is_some() && self.secret.is_some()
    }
}

/// Logging switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggingConfig {
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let verbose = non_empty(lookup(LOGGING_ENABLED_VAR))
            .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(false);
        Self { verbose }
    }
}

/// Subscription id from `name`, or from `AZURE_SUBSCRIPTION_ID` when no name is given
pub fn subscription_env_var(name: Option<&str>) -> Option<String> {
    non_empty(std::env::var(name.unwrap_or(SUBSCRIPTION_ID_VAR)).ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
