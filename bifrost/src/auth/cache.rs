//! Process-scoped cache of derived credentials.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use super::AuthError;

/// Tokens this close to expiry are treated as expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// A derived, ready-to-use credential.
#[derive(Clone)]
pub struct AuthHandle {
    access_token: String,
    expires_at: Option<Instant>,
}

impl fmt::Debug for AuthHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthHandle")
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AuthHandle {
    /// Create a handle that never expires.
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    /// Set the lifetime from now.
    #[must_use]
    pub fn expires_in(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(Instant::now() + lifetime);
        self
    }

    /// The bearer token.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Whether the token is expired or about to expire.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|at| Instant::now() + EXPIRY_SKEW >= at)
    }
}

/// Derived credentials keyed by the SHA-256 of the credential material.
///
/// Raw secrets are never stored as keys. The map is sharded, so lookups for
/// different credentials never contend. Concurrent misses for the same
/// credential may each derive a handle, but only the first live handle is
/// published and every caller receives it.
#[derive(Debug, Default)]
pub struct AuthClientCache {
    entries: DashMap<String, Arc<AuthHandle>>,
}

impl AuthClientCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of the credential material.
    #[must_use]
    pub fn cache_key(credential: &str) -> String {
        hex::encode(Sha256::digest(credential.as_bytes()))
    }

    /// Look up a live handle. Expired handles are evicted.
    #[must_use]
    pub fn get(&self, credential: &str) -> Option<Arc<AuthHandle>> {
        let key = Self::cache_key(credential);
        let handle = self.entries.get(&key).map(|entry| Arc::clone(entry.value()))?;
        if handle.is_expired() {
            if self.entries.remove_if(&key, |_, cached| cached.is_expired()).is_some() {
                debug!("evicted expired credential");
            }
            return None;
        }
        Some(handle)
    }

    /// Return the cached handle or derive and publish a new one.
    ///
    /// A failed derivation evicts any entry for the credential.
    ///
    /// # Errors
    ///
    /// Returns the derivation error.
    pub async fn get_or_create<F, Fut>(
        &self,
        credential: &str,
        derive: F,
    ) -> Result<Arc<AuthHandle>, AuthError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<AuthHandle, AuthError>> + Send,
    {
        if let Some(handle) = self.get(credential) {
            return Ok(handle);
        }
        let key = Self::cache_key(credential);
        match derive().await {
            Ok(handle) => {
                let published = match self.entries.entry(key) {
                    Entry::Occupied(entry) if !entry.get().is_expired() => Arc::clone(entry.get()),
                    Entry::Occupied(mut entry) => {
                        let handle = Arc::new(handle);
                        entry.insert(Arc::clone(&handle));
                        handle
                    }
                    Entry::Vacant(entry) => Arc::clone(entry.insert(Arc::new(handle)).value()),
                };
                debug!(entries = self.entries.len(), "derived credential cached");
                Ok(published)
            }
            Err(e) => {
                self.entries.remove(&key);
                Err(e)
            }
        }
    }

    /// Evict the handle derived from `credential`. Returns whether one existed.
    pub fn invalidate(&self, credential: &str) -> bool {
        let removed = self.entries.remove(&Self::cache_key(credential)).is_some();
        if removed {
            debug!("invalidated cached credential");
        }
        removed
    }

    /// Evict everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
