//! Lookup from provider tag to strategies.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{Provider, ProviderConfig, ProviderParts, anthropic, bedrock, cohere, gemini, openai, vertex};
use crate::auth::{AuthClientCache, GoogleTokenDeriver, TokenDeriver};
use crate::error::{BifrostError, Result};
use crate::schemas::ModelProvider;
use crate::transport::Transport;

/// Builds the strategies of one provider.
pub type PartsBuilder = Arc<dyn Fn(&BuildContext) -> ProviderParts + Send + Sync>;

/// Shared collaborators handed to every [`PartsBuilder`].
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Built-in provider being assembled.
    pub provider: ModelProvider,
    /// Process-scoped derived credential cache.
    pub auth_cache: Arc<AuthClientCache>,
    /// OAuth token derivation for providers that need it.
    pub token_deriver: Arc<dyn TokenDeriver>,
}

/// Maps built-in providers to their strategies.
///
/// Custom providers are resolved through their `base_provider`.
#[derive(Clone)]
pub struct ProviderRegistry {
    builders: HashMap<ModelProvider, PartsBuilder>,
    auth_cache: Arc<AuthClientCache>,
    token_deriver: Option<Arc<dyn TokenDeriver>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut providers: Vec<_> = self.builders.keys().map(ModelProvider::as_str).collect();
        providers.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("providers", &providers)
            .field("auth_cache_entries", &self.auth_cache.len())
            .finish_non_exhaustive()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// A registry with every built-in provider and its own credential cache.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            builders: HashMap::new(),
            auth_cache: Arc::new(AuthClientCache::new()),
            token_deriver: None,
        };
        for provider in openai::FAMILY {
            registry.register(provider, Arc::new(|cx: &BuildContext| openai::parts(&cx.provider)));
        }
        registry.register(
            ModelProvider::Anthropic,
            Arc::new(|_: &BuildContext| anthropic::parts()),
        );
        registry.register(
            ModelProvider::AnthropicPassthrough,
            Arc::new(|_: &BuildContext| anthropic::passthrough_parts()),
        );
        registry.register(ModelProvider::Bedrock, Arc::new(|_: &BuildContext| bedrock::parts()));
        registry.register(
            ModelProvider::Vertex,
            Arc::new(|cx: &BuildContext| {
                vertex::parts(Arc::clone(&cx.auth_cache), Arc::clone(&cx.token_deriver))
            }),
        );
        registry.register(ModelProvider::Gemini, Arc::new(|_: &BuildContext| gemini::parts()));
        registry.register(ModelProvider::Cohere, Arc::new(|_: &BuildContext| cohere::parts()));
        registry
    }

    /// Share an existing credential cache.
    #[must_use]
    pub fn with_auth_cache(mut self, cache: Arc<AuthClientCache>) -> Self {
        self.auth_cache = cache;
        self
    }

    /// Replace the OAuth token deriver.
    ///
    /// By default a [`GoogleTokenDeriver`] over the provider's transport is used.
    #[must_use]
    pub fn with_token_deriver(mut self, deriver: Arc<dyn TokenDeriver>) -> Self {
        self.token_deriver = Some(deriver);
        self
    }

    /// Register or replace the strategies of a provider.
    pub fn register(&mut self, provider: ModelProvider, builder: PartsBuilder) {
        self.builders.insert(provider, builder);
    }

    /// The credential cache.
    #[must_use]
    pub const fn auth_cache(&self) -> &Arc<AuthClientCache> {
        &self.auth_cache
    }

    /// Whether strategies exist for the provider.
    #[must_use]
    pub fn contains(&self, provider: &ModelProvider) -> bool {
        self.builders.contains_key(provider)
    }

    /// Assemble a façade.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider, or the base of a
    /// custom provider, is unknown.
    pub fn build(
        &self,
        provider: &ModelProvider,
        config: ProviderConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Provider> {
        let base = config
            .custom_provider
            .as_ref()
            .map_or_else(|| provider.clone(), |c| c.base_provider.clone());
        if matches!(base, ModelProvider::Custom(_)) {
            return Err(BifrostError::configuration(
                provider,
                format!("custom provider must be based on a built-in provider, got {base}"),
            ));
        }
        let builder = self.builders.get(&base).ok_or_else(|| {
            BifrostError::configuration(provider, format!("unknown provider {base}"))
        })?;

        let token_deriver = self.token_deriver.clone().unwrap_or_else(|| {
            Arc::new(GoogleTokenDeriver::new(Arc::clone(&transport))) as Arc<dyn TokenDeriver>
        });
        let parts = builder(&BuildContext {
            provider: base.clone(),
            auth_cache: Arc::clone(&self.auth_cache),
            token_deriver,
        });
        debug!(provider = %provider, base = %base, "assembled provider");
        Ok(Provider::new(provider.clone(), base, config, parts, transport))
    }
}
