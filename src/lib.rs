//! azlogin library interface
//!
//! Azure Active Directory credentials for Azure Resource Manager style APIs.
//!
//! # Module Organization
//!
//! - [`credentials`] - Credential kinds and the [`Credential`] sum type
//! - [`cache`] - Token cache trait and the in-memory cache
//! - [`aad`] - Token endpoint exchanges (client credentials, password, refresh, device code)
//! - [`subscriptions`] - Tenant and subscription discovery
//! - [`login`] - One-call sign-in flows
//! - [`keyvault`] - Key Vault challenge authentication
//! - [`environment`] - Built-in and custom Azure clouds
//! - [`errors`] - Error types (AuthError, Result)

pub mod aad;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod environment;
pub mod errors;
pub mod keyvault;
pub mod logging;
pub mod login;
pub mod subscriptions;
pub mod token;

pub use cache::{CacheEntry, CacheQuery, MemoryCache, TokenCache};
pub use credentials::{
    ApplicationTokenCredentials, AzureCliCredentials, Credential, CredentialOptions, DeviceTokenCredentials,
    DomainCredentials, ManagedIdentityCredentials, MsiAppServiceTokenCredentials, MsiVmTokenCredentials,
    TokenAudience, UserTokenCredentials,
};
pub use environment::AzureEnvironment;
pub use errors::{AuthError, Result};
pub use keyvault::KeyVaultCredentials;
pub use login::AuthResponse;
pub use subscriptions::{SubscriptionInfo, User, UserType};
pub use token::{AccessToken, TokenResponse};
