//! Token cache
//!
//! Credentials share a cache through `Arc<dyn TokenCache>`. The default
//! [`MemoryCache`] lives for the life of the process: nothing is evicted
//! except stale entries a failed lookup asks to remove.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::errors::Result;
use crate::token::TokenResponse;

/// A cached token and the identity it was issued for
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Authority the token was issued by (`<login endpoint><tenant>`)
    pub authority: String,
    pub client_id: String,
    pub resource: String,
    /// Signed-in user, absent for service principals
    pub user_id: Option<String>,
    pub token: TokenResponse,
}

impl CacheEntry {
    fn key(&self) -> CacheKey {
        CacheKey {
            authority: self.authority.to_ascii_lowercase(),
            client_id: self.client_id.clone(),
            resource: self.resource.clone(),
            user_id: self.user_id.as_ref().map(|u| u.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    authority: String,
    client_id: String,
    resource: String,
    user_id: Option<String>,
}

/// Filter for [`TokenCache::find`]; unset fields match anything
#[derive(Debug, Clone, Default)]
pub struct CacheQuery {
    pub authority: Option<String>,
    pub client_id: Option<String>,
    pub resource: Option<String>,
    pub user_id: Option<String>,
}

impl CacheQuery {
    /// All entries issued to a client
    pub fn for_client(client_id: impl Into<String>) -> Self {
        Self {
            client_id: Some(client_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &CacheEntry) -> bool {
        let authority = self
            .authority
            .as_ref()
            .is_none_or(|a| a.eq_ignore_ascii_case(&entry.authority));
        let client = self.client_id.as_ref().is_none_or(|c| *c == entry.client_id);
        let resource = self.resource.as_ref().is_none_or(|r| *r == entry.resource);
        // user ids differ only by casing between the token and what callers type
        let user = self.user_id.as_ref().is_none_or(|u| {
            entry
                .user_id
                .as_ref()
                .is_some_and(|e| e.to_lowercase() == u.to_lowercase())
        });
        authority && client && resource && user
    }
}

/// Storage for issued tokens
pub trait TokenCache: Send + Sync + fmt::Debug {
    /// Entries matching `query`
    fn find(&self, query: &CacheQuery) -> Result<Vec<CacheEntry>>;

    /// Insert entries, replacing any with the same identity
    fn add(&self, entries: Vec<CacheEntry>) -> Result<()>;

    /// Remove entries; entries that are already gone are ignored
    fn remove(&self, entries: &[CacheEntry]) -> Result<()>;
}

/// In-memory cache
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh cache behind the shared handle credentials expect
    pub fn shared() -> Arc<dyn TokenCache> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenCache for MemoryCache {
    fn find(&self, query: &CacheQuery) -> Result<Vec<CacheEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| query.matches(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    fn add(&self, entries: Vec<CacheEntry>) -> Result<()> {
        for entry in entries {
            self.entries.insert(entry.key(), entry);
        }
        Ok(())
    }

    fn remove(&self, entries: &[CacheEntry]) -> Result<()> {
        for entry in entries {
            self.entries.remove(&entry.key());
        }
        Ok(())
    }
}
