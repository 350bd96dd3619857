//! Account-driven dispatch across providers.
//!
//! A [`Gateway`] resolves the provider of a request, picks one of the
//! account's keys for the requested model and hands the call to that
//! provider's façade. It owns the process-scoped credential cache and the
//! post-hooks applied to every streamed chunk.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::auth::AuthClientCache;
use crate::context::Context;
use crate::error::{BifrostError, Result};
use crate::providers::{Provider, ProviderConfig, ProviderRegistry};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Key, ModelProvider, Operation,
};
use crate::streaming::{ChunkReceiver, HookChain, PostHook};
use crate::transport::{ReqwestTransport, Transport};

/// Source of provider configuration and credentials.
#[async_trait]
pub trait Account: Send + Sync + fmt::Debug {
    /// Providers this account has configured.
    async fn configured_providers(&self) -> Result<Vec<ModelProvider>>;

    /// Configuration of one provider.
    async fn config_for_provider(&self, provider: &ModelProvider) -> Result<ProviderConfig>;

    /// Keys of one provider.
    async fn keys_for_provider(&self, provider: &ModelProvider) -> Result<Vec<Key>>;
}

/// Entry point that routes canonical requests to provider façades.
pub struct Gateway {
    account: Arc<dyn Account>,
    registry: ProviderRegistry,
    transport: Option<Arc<dyn Transport>>,
    providers: RwLock<HashMap<ModelProvider, Provider>>,
    hooks: HookChain,
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("account", &self.account)
            .field("registry", &self.registry)
            .field("providers", &self.provider_count())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// A gateway over every built-in provider with a fresh credential cache.
    #[must_use]
    pub fn new(account: Arc<dyn Account>) -> Self {
        Self {
            account,
            registry: ProviderRegistry::new(),
            transport: None,
            providers: RwLock::new(HashMap::new()),
            hooks: HookChain::new(),
        }
    }

    /// Use a custom registry.
    #[must_use]
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Send every provider's traffic through one transport instead of a
    /// client built from its configuration.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Append a post-hook applied to every streamed chunk.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostHook>) -> Self {
        self.hooks = self.hooks.with(hook);
        self
    }

    /// The credential cache shared by all providers.
    #[must_use]
    pub const fn auth_cache(&self) -> &Arc<AuthClientCache> {
        self.registry.auth_cache()
    }

    /// Build the façade of every configured provider.
    ///
    /// # Errors
    ///
    /// Account lookups and façade construction errors.
    pub async fn init(&self) -> Result<()> {
        for provider in self.account.configured_providers().await? {
            self.provider(&provider).await?;
        }
        info!(providers = self.provider_count(), "gateway initialized");
        Ok(())
    }

    /// The façade of `name`, built on first use.
    ///
    /// # Errors
    ///
    /// Account lookups and façade construction errors.
    pub async fn provider(&self, name: &ModelProvider) -> Result<Provider> {
        let cached = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        if let Some(provider) = cached {
            return Ok(provider);
        }
        let config = self.account.config_for_provider(name).await?;
        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::new(&config.transport_config())?),
        };
        let provider = self.registry.build(name, config, transport)?;
        debug!(provider = %name, "provider ready");
        Ok(self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.clone())
            .or_insert(provider)
            .clone())
    }

    fn provider_count(&self) -> usize {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Pick a key of `provider` able to serve `model`.
    ///
    /// Keys restricted to other models or deployments are skipped and the
    /// rest are chosen at random in proportion to their weight. Listing
    /// models ignores model restrictions.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no key qualifies.
    pub async fn select_key(
        &self,
        provider: &Provider,
        operation: Operation,
        model: &str,
    ) -> Result<Key> {
        let name = provider.name();
        let keys = self.account.keys_for_provider(name).await?;
        if keys.is_empty() && provider.base().is_keyless() {
            return Ok(Key::new(""));
        }
        let candidates: Vec<Key> = keys
            .into_iter()
            .filter(|key| has_credential(provider.base(), key))
            .filter(|key| operation == Operation::ListModels || serves_model(key, model))
            .collect();
        if candidates.is_empty() {
            return Err(BifrostError::configuration(
                name,
                format!("no keys found that support model: {model}"),
            ));
        }
        Ok(weighted_choice(candidates))
    }

    /// Run a unary operation.
    ///
    /// # Errors
    ///
    /// Key selection, gating, transport and upstream errors.
    #[instrument(skip_all, fields(provider = %request.provider, operation = %operation.as_str(), model = %request.model))]
    pub async fn call(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
        operation: Operation,
    ) -> Result<CanonicalResponse> {
        let provider = self.provider(&request.provider).await?;
        let key = self.select_key(&provider, operation, &request.model).await?;
        provider.call(ctx, &key, request, operation).await
    }

    /// Run a streaming operation with the gateway's post-hooks installed.
    ///
    /// # Errors
    ///
    /// Key selection, gating and handshake errors.
    #[instrument(skip_all, fields(provider = %request.provider, operation = %operation.as_str(), model = %request.model))]
    pub async fn call_stream(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
        operation: Operation,
    ) -> Result<ChunkReceiver> {
        let provider = self.provider(&request.provider).await?;
        let key = self.select_key(&provider, operation, &request.model).await?;
        let hook = (!self.hooks.is_empty())
            .then(|| Arc::new(self.hooks.clone()) as Arc<dyn PostHook>);
        provider.call_stream(ctx, &key, request, operation, hook).await
    }

    /// Chat completion.
    ///
    /// # Errors
    ///
    /// See [`Gateway::call`].
    pub async fn chat_completion(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.call(ctx, request, Operation::ChatCompletion).await
    }

    /// Streaming chat completion.
    ///
    /// # Errors
    ///
    /// See [`Gateway::call_stream`].
    pub async fn chat_completion_stream(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
    ) -> Result<ChunkReceiver> {
        self.call_stream(ctx, request, Operation::ChatCompletionStream)
            .await
    }

    /// Embeddings.
    ///
    /// # Errors
    ///
    /// See [`Gateway::call`].
    pub async fn embedding(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.call(ctx, request, Operation::Embedding).await
    }

    /// Model listing.
    ///
    /// # Errors
    ///
    /// See [`Gateway::call`].
    pub async fn list_models(
        &self,
        ctx: &Context,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.call(ctx, request, Operation::ListModels).await
    }

    /// Drop every façade and derived credential.
    pub fn shutdown(&self) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.auth_cache().clear();
        info!("gateway shut down");
    }
}

fn has_credential(base: &ModelProvider, key: &Key) -> bool {
    !key.value.trim().is_empty()
        || base.is_keyless()
        || matches!(base, ModelProvider::Vertex | ModelProvider::Bedrock)
}

fn serves_model(key: &Key, model: &str) -> bool {
    let deployed = |deployments: &std::collections::HashMap<String, String>| {
        deployments.is_empty() || deployments.contains_key(model)
    };
    key.supports_model(model)
        && key.azure().is_none_or(|c| deployed(&c.deployments))
        && key.bedrock().is_none_or(|c| deployed(&c.deployments))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn weighted_choice(mut keys: Vec<Key>) -> Key {
    let weights: Vec<u64> = keys
        .iter()
        .map(|k| (k.weight.max(0.0) * 100.0) as u64)
        .collect();
    let total: u64 = weights.iter().sum();
    let index = if keys.len() == 1 || total == 0 {
        0
    } else {
        let mut roll = fastrand::u64(..total);
        weights
            .iter()
            .position(|&w| {
                if roll < w {
                    true
                } else {
                    roll -= w;
                    false
                }
            })
            .unwrap_or(0)
    };
    keys.swap_remove(index)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::schemas::{BedrockKeyConfig, ChatMessage, KeyConfig};
    use crate::transport::mock::MockTransport;

    #[derive(Debug, Default)]
    struct StaticAccount {
        keys: HashMap<ModelProvider, Vec<Key>>,
    }

    #[async_trait]
    impl Account for StaticAccount {
        async fn configured_providers(&self) -> Result<Vec<ModelProvider>> {
            Ok(self.keys.keys().cloned().collect())
        }

        async fn config_for_provider(&self, _provider: &ModelProvider) -> Result<ProviderConfig> {
            Ok(ProviderConfig::default())
        }

        async fn keys_for_provider(&self, provider: &ModelProvider) -> Result<Vec<Key>> {
            Ok(self.keys.get(provider).cloned().unwrap_or_default())
        }
    }

    fn gateway(keys: Vec<Key>, transport: &Arc<MockTransport>) -> Gateway {
        let account = StaticAccount {
            keys: HashMap::from([(ModelProvider::OpenAi, keys)]),
        };
        Gateway::new(Arc::new(account)).with_transport(Arc::clone(transport) as Arc<dyn Transport>)
    }

    #[tokio::test]
    async fn test_key_restricted_to_model() {
        let transport = Arc::new(MockTransport::new());
        let gateway = gateway(
            vec![
                Key::new("sk-mini").with_models(["gpt-4o-mini"]),
                Key::new("sk-big").with_models(["gpt-4o"]),
            ],
            &transport,
        );
        let provider = gateway.provider(&ModelProvider::OpenAi).await.unwrap();
        for _ in 0..20 {
            let key = gateway
                .select_key(&provider, Operation::ChatCompletion, "gpt-4o")
                .await
                .unwrap();
            assert_eq!(key.value, "sk-big");
        }
        let err = gateway
            .select_key(&provider, Operation::ChatCompletion, "o3")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_zero_weight_key_is_never_chosen() {
        let transport = Arc::new(MockTransport::new());
        let mut idle = Key::new("sk-idle");
        idle.weight = 0.0;
        let gateway = gateway(vec![idle, Key::new("sk-live")], &transport);
        let provider = gateway.provider(&ModelProvider::OpenAi).await.unwrap();
        for _ in 0..50 {
            let key = gateway
                .select_key(&provider, Operation::ChatCompletion, "gpt-4o")
                .await
                .unwrap();
            assert_eq!(key.value, "sk-live");
        }
    }

    #[test]
    fn test_bedrock_deployments_gate_models() {
        let key = Key::new("").with_config(KeyConfig::Bedrock(BedrockKeyConfig {
            deployments: HashMap::from([("claude".to_owned(), "anthropic.claude-v2".to_owned())]),
            ..BedrockKeyConfig::default()
        }));
        assert!(serves_model(&key, "claude"));
        assert!(!serves_model(&key, "titan"));
        assert!(has_credential(&ModelProvider::Bedrock, &key));
        assert!(!has_credential(&ModelProvider::OpenAi, &key));
    }

    #[tokio::test]
    async fn test_call_dispatches_with_selected_key() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(
            200,
            &json!({
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
            }),
        );
        let gateway = gateway(vec![Key::new("sk-live")], &transport);
        gateway.init().await.unwrap();
        let request = CanonicalRequest::chat(
            ModelProvider::OpenAi,
            "gpt-4o",
            vec![ChatMessage::user("Say hi")],
        );
        let response = gateway
            .chat_completion(&Context::new(), &request)
            .await
            .unwrap();
        assert_eq!(response.text(), Some("Hi"));
        let sent = transport.last_request().unwrap();
        assert_eq!(sent.header_str("authorization"), Some("Bearer sk-live"));
    }

    #[tokio::test]
    async fn test_shutdown_clears_state() {
        let transport = Arc::new(MockTransport::new());
        let gateway = gateway(vec![Key::new("sk-live")], &transport);
        gateway.init().await.unwrap();
        gateway
            .auth_cache()
            .get_or_create("cred", || async { Ok(crate::auth::AuthHandle::new("tok")) })
            .await
            .unwrap();
        assert!(!gateway.auth_cache().is_empty());
        gateway.shutdown();
        assert!(gateway.auth_cache().is_empty());
        assert_eq!(gateway.provider_count(), 0);
    }
}
