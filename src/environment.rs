//! Azure cloud environments
//!
//! Endpoint sets for the public and sovereign clouds. Callers talking to a
//! private deployment (or a mock server in tests) build their own with
//! [`AzureEnvironment::custom`].

use serde::{Deserialize, Serialize};

/// The endpoints a credential needs to authenticate and enumerate subscriptions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureEnvironment {
    /// Environment name, e.g. "AzureCloud"
    pub name: String,
    /// Portal URL
    pub portal_url: String,
    /// Classic management endpoint
    pub management_endpoint_url: String,
    /// Azure Resource Manager endpoint
    pub resource_manager_endpoint_url: String,
    /// Active Directory login endpoint, always ends with '/'
    pub active_directory_endpoint_url: String,
    /// Default token audience for Resource Manager access
    pub active_directory_resource_id: String,
    /// Token audience of the directory graph
    pub active_directory_graph_resource_id: String,
    /// Whether the authority should be validated
    pub validate_authority: bool,
}

impl AzureEnvironment {
    /// Public Azure cloud
    pub fn azure() -> Self {
        Self {
            name: "AzureCloud".to_string(),
            portal_url: "https://portal.azure.com".to_string(),
            management_endpoint_url: "https://management.core.windows.net".to_string(),
            resource_manager_endpoint_url: "https://management.azure.com/".to_string(),
            active_directory_endpoint_url: "https://login.microsoftonline.com/".to_string(),
            active_directory_resource_id: "https://management.core.windows.net/".to_string(),
            active_directory_graph_resource_id: "https://graph.windows.net/".to_string(),
            validate_authority: true,
        }
    }

    /// Azure China cloud
    pub fn azure_china() -> Self {
        Self {
            name: "AzureChinaCloud".to_string(),
            portal_url: "https://portal.azure.cn".to_string(),
            management_endpoint_url: "https://management.core.chinacloudapi.cn".to_string(),
            resource_manager_endpoint_url: "https://management.chinacloudapi.cn".to_string(),
            active_directory_endpoint_url: "https://login.chinacloudapi.cn/".to_string(),
            active_directory_resource_id: "https://management.core.chinacloudapi.cn/".to_string(),
            active_directory_graph_resource_id: "https://graph.chinacloudapi.cn/".to_string(),
            validate_authority: true,
        }
    }

    /// Azure US Government cloud
    pub fn azure_us_government() -> Self {
        Self {
            name: "AzureUSGovernment".to_string(),
            portal_url: "https://portal.azure.us".to_string(),
            management_endpoint_url: "https://management.core.usgovcloudapi.net".to_string(),
            resource_manager_endpoint_url: "https://management.usgovcloudapi.net".to_string(),
            active_directory_endpoint_url: "https://login.microsoftonline.us/".to_string(),
            active_directory_resource_id: "https://management.core.usgovcloudapi.net/".to_string(),
            active_directory_graph_resource_id: "https://graph.windows.net/".to_string(),
            validate_authority: true,
        }
    }

    /// Azure German cloud
    pub fn azure_german_cloud() -> Self {
        Self {
            name: "AzureGermanCloud".to_string(),
            portal_url: "https://portal.microsoftazure.de/".to_string(),
            management_endpoint_url: "https://management.core.cloudapi.de".to_string(),
            resource_manager_endpoint_url: "https://management.microsoftazure.de".to_string(),
            active_directory_endpoint_url: "https://login.microsoftonline.de/".to_string(),
            active_directory_resource_id: "https://management.core.cloudapi.de/".to_string(),
            active_directory_graph_resource_id: "https://graph.cloudapi.de/".to_string(),
            validate_authority: true,
        }
    }

    /// Build an environment with explicit login and resource manager endpoints.
    ///
    /// The remaining endpoints are derived from these two: the token audience
    /// defaults to the resource manager endpoint and the graph audience to
    /// `<login endpoint>graph/`.
    pub fn custom(
        name: impl Into<String>,
        active_directory_endpoint_url: impl Into<String>,
        resource_manager_endpoint_url: impl Into<String>,
    ) -> Self {
        let active_directory_endpoint_url = with_trailing_slash(active_directory_endpoint_url.into());
        let resource_manager_endpoint_url = resource_manager_endpoint_url.into();

        Self {
            name: name.into(),
            portal_url: "https://portal.azure.com".to_string(),
            management_endpoint_url: resource_manager_endpoint_url.clone(),
            active_directory_resource_id: resource_manager_endpoint_url.clone(),
            active_directory_graph_resource_id: format!("{}graph/", active_directory_endpoint_url),
            resource_manager_endpoint_url,
            active_directory_endpoint_url,
            validate_authority: false,
        }
    }

    /// All built-in environments
    pub fn known() -> Vec<Self> {
        vec![
            Self::azure(),
            Self::azure_china(),
            Self::azure_us_government(),
            Self::azure_german_cloud(),
        ]
    }

    /// Look up a built-in environment by name (case-insensitive)
    pub fn by_name(name: &str) -> Option<Self> {
        Self::known()
            .into_iter()
            .find(|env| env.name.eq_ignore_ascii_case(name))
    }

    /// Authority URL for a tenant: `<login endpoint><domain>`
    pub fn authority(&self, domain: &str) -> String {
        format!("{}{}", self.active_directory_endpoint_url, domain)
    }

    /// Resource manager URL for `path`, joined with exactly one '/'
    pub fn resource_manager_url(&self, path: &str) -> String {
        let base = self.resource_manager_endpoint_url.trim_end_matches('/');
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

impl Default for AzureEnvironment {
    fn default() -> Self {
        Self::azure()
    }
}

fn with_trailing_slash(url: String) -> String {
    if url.ends_with('/') {
        url
    } else {
        format!("{}/", url)
    }
}
