//! Request authentication.
//!
//! An [`Authenticator`] decorates an outbound request with credentials
//! taken from the per-call [`Key`]. Providers whose credentials need an
//! expensive exchange go through the [`AuthClientCache`], and every
//! authenticator can be told to forget a key after the upstream rejects it.

mod cache;
mod google;
mod sigv4;

pub use cache::{AuthClientCache, AuthHandle};
pub use google::{GoogleTokenDeriver, METADATA_TOKEN_URL, TOKEN_URL, TokenDeriver};
pub use sigv4::{AwsCredentials, DEFAULT_REGION, resolve_region, sign_request};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::context::Context;
use crate::error::{BifrostError, ErrorKind, Result};
use crate::schemas::Key;
use crate::transport::HttpRequest;

/// Errors raised while deriving or applying credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required credential is absent.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The credential kind cannot be handled here.
    #[error("unsupported credential: {0}")]
    UnsupportedCredential(String),

    /// The token endpoint rejected the exchange.
    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    /// The request could not be signed.
    #[error("request signing failed: {0}")]
    Signing(String),

    /// A credential document is malformed.
    #[error("invalid credential document: {0}")]
    Json(#[from] serde_json::Error),

    /// A credential file could not be read.
    #[error("failed to read credential file: {0}")]
    Io(#[from] std::io::Error),

    /// A URL is malformed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The exchange request failed in transit.
    #[error(transparent)]
    Transport(#[from] BifrostError),
}

impl From<AuthError> for BifrostError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Transport(inner) => inner,
            other => Self::new(ErrorKind::Configuration, None, other.to_string()).with_source(other),
        }
    }
}

/// Applies credentials to outbound requests.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Add credentials for `key` to `request`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing or unusable credentials.
    async fn authorize(&self, ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()>;

    /// Forget anything derived from `key`.
    fn invalidate(&self, _key: &Key) {}
}

/// Where an API key goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPlacement {
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// The raw key in the named header.
    Header(&'static str),
}

/// Static API key authentication.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyAuth {
    placement: KeyPlacement,
    required: bool,
}

impl ApiKeyAuth {
    /// Bearer token authentication requiring a key.
    #[must_use]
    pub const fn bearer() -> Self {
        Self {
            placement: KeyPlacement::Bearer,
            required: true,
        }
    }

    /// Key in a named header.
    #[must_use]
    pub const fn header(name: &'static str) -> Self {
        Self {
            placement: KeyPlacement::Header(name),
            required: true,
        }
    }

    /// Send the key only when one is supplied.
    #[must_use]
    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
    async fn authorize(&self, _ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()> {
        if key.value.is_empty() {
            if self.required {
                return Err(AuthError::MissingCredential("api key".into()).into());
            }
            return Ok(());
        }
        match self.placement {
            KeyPlacement::Bearer => request.set_header("authorization", &format!("Bearer {}", key.value)),
            KeyPlacement::Header(name) => request.set_header(name, &key.value),
        }
        Ok(())
    }
}

/// Azure OpenAI: `api-key`, or a bearer token for Entra ID keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct AzureAuth;

#[async_trait]
impl Authenticator for AzureAuth {
    async fn authorize(&self, ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()> {
        let auth = if key.azure().is_some_and(|c| c.use_bearer_token) {
            ApiKeyAuth::bearer()
        } else {
            ApiKeyAuth::header("api-key")
        };
        auth.authorize(ctx, key, request).await
    }
}

/// AWS authentication: bearer API keys, or SigV4 with static or
/// environment credentials.
#[derive(Debug, Clone)]
pub struct SigV4Auth {
    service: &'static str,
}

impl SigV4Auth {
    /// Sign for the given AWS service.
    #[must_use]
    pub const fn new(service: &'static str) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Authenticator for SigV4Auth {
    async fn authorize(&self, _ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()> {
        if !key.value.is_empty() {
            request.set_header("authorization", &format!("Bearer {}", key.value));
            return Ok(());
        }
        let config = key.bedrock();
        let credentials = config
            .and_then(AwsCredentials::from_config)
            .or_else(AwsCredentials::from_env)
            .ok_or_else(|| AuthError::MissingCredential("aws access key and secret key".into()))?;
        let region = resolve_region(config);
        sign_request(request, &credentials, &region, self.service, chrono::Utc::now())?;
        Ok(())
    }
}

/// OAuth bearer tokens derived through the [`AuthClientCache`].
#[derive(Debug, Clone)]
pub struct OAuthAuth {
    cache: Arc<AuthClientCache>,
    deriver: Arc<dyn TokenDeriver>,
}

impl OAuthAuth {
    /// Create an authenticator sharing `cache`.
    #[must_use]
    pub fn new(cache: Arc<AuthClientCache>, deriver: Arc<dyn TokenDeriver>) -> Self {
        Self { cache, deriver }
    }

    fn credential(key: &Key) -> &str {
        key.vertex().map_or(key.value.as_str(), |c| c.auth_credentials.as_str())
    }
}

#[async_trait]
impl Authenticator for OAuthAuth {
    async fn authorize(&self, ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()> {
        let credential = Self::credential(key);
        let deriver = Arc::clone(&self.deriver);
        let handle = self
            .cache
            .get_or_create(credential, || async move { deriver.derive(ctx, credential).await })
            .await?;
        request.set_header("authorization", &format!("Bearer {}", handle.access_token()));
        Ok(())
    }

    fn invalidate(&self, key: &Key) {
        if self.cache.invalidate(Self::credential(key)) {
            debug!(key_id = %key.id, "dropped cached oauth token");
        }
    }
}

/// No authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl Authenticator for NoAuth {
    async fn authorize(&self, _ctx: &Context, _key: &Key, _request: &mut HttpRequest) -> Result<()> {
        Ok(())
    }
}
