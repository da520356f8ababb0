//! Error types for azlogin

use thiserror::Error;

/// Prefix carried by errors raised when the token cache cannot be repaired
pub const SDK_INTERNAL_ERROR: &str = "SDK_INTERNAL_ERROR";

/// Main error type for azlogin
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Token request failed: {}", describe_endpoint_error(.error, .description))]
    TokenEndpoint {
        error: String,
        description: Option<String>,
    },

    #[error("Entry not found in cache.")]
    CacheMiss,

    #[error("Token cache error: {0}")]
    Cache(String),

    #[error("SDK_INTERNAL_ERROR : {0}")]
    Internal(String),

    #[error("The userId \"{token_user}\" in access token doesn't match the username \"{username}\" provided during authentication.")]
    IdentityMismatch {
        token_user: String,
        username: String,
    },

    #[error("Malformed token response: {0}")]
    MalformedResponse(String),

    #[error("Device code error: {0}")]
    DeviceCode(String),

    #[error("Azure CLI error: {0}")]
    Cli(String),

    #[error("Resource manager request failed with status {status}: {body}")]
    ResourceManager {
        status: u16,
        body: String,
    },

    #[error("invalid header value: {0}")]
    InvalidHeader(String),
}

fn describe_endpoint_error(error: &str, description: &Option<String>) -> String {
    match description {
        Some(desc) => format!("{}: {}", error, desc),
        None => error.to_string(),
    }
}

impl AuthError {
    /// Whether this error must never be hidden behind a network fallback
    pub fn is_internal(&self) -> bool {
        matches!(self, AuthError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
