//! Per-provider configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::schemas::{Capabilities, ModelProvider, Operation};
use crate::transport::{ProxyConfig, TransportConfig};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default capacity of a stream channel.
pub const DEFAULT_STREAM_BUFFER_SIZE: usize = 5000;

/// Default base URL of a provider.
///
/// Azure, Bedrock and Vertex derive their URLs from the key configuration
/// and SGLang has no public endpoint, so these return `None`.
#[must_use]
pub const fn default_base_url(provider: &ModelProvider) -> Option<&'static str> {
    match provider {
        ModelProvider::OpenAi => Some("https://api.openai.com"),
        ModelProvider::Anthropic | ModelProvider::AnthropicPassthrough => {
            Some("https://api.anthropic.com")
        }
        ModelProvider::Cohere => Some("https://api.cohere.ai"),
        ModelProvider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
        ModelProvider::Mistral => Some("https://api.mistral.ai"),
        ModelProvider::Groq => Some("https://api.groq.com/openai"),
        ModelProvider::Ollama => Some("http://localhost:11434"),
        ModelProvider::Cerebras => Some("https://api.cerebras.ai"),
        ModelProvider::OpenRouter => Some("https://openrouter.ai/api"),
        ModelProvider::Parasail => Some("https://api.parasail.io"),
        ModelProvider::Azure
        | ModelProvider::Bedrock
        | ModelProvider::Vertex
        | ModelProvider::Sgl
        | ModelProvider::Custom(_) => None,
    }
}

/// Network settings of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base URL override.
    pub base_url: Option<String>,
    /// Headers added to every outbound call unless already set.
    pub extra_headers: BTreeMap<String, String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// User agent for clients built from this configuration.
    pub user_agent: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            extra_headers: BTreeMap::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: None,
        }
    }
}

/// A named provider built on a built-in one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomProviderConfig {
    /// Provider whose wire format is reused.
    pub base_provider: ModelProvider,
    /// Operations callers may use. Empty allows everything the base
    /// provider supports.
    #[serde(default)]
    pub allowed_requests: Vec<Operation>,
}

impl CustomProviderConfig {
    /// Allowed operations as a set, `None` when unrestricted.
    #[must_use]
    pub fn allowed(&self) -> Option<Capabilities> {
        if self.allowed_requests.is_empty() {
            None
        } else {
            Some(self.allowed_requests.iter().copied().collect())
        }
    }
}

/// Everything a provider façade needs besides its strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Proxy for clients built from this configuration.
    pub proxy: Option<ProxyConfig>,
    /// Stream channel capacity.
    pub stream_buffer_size: usize,
    /// Attach the upstream payload to responses and chunks.
    pub send_back_raw_response: bool,
    /// Custom provider settings.
    pub custom_provider: Option<CustomProviderConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            proxy: None,
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            send_back_raw_response: false,
            custom_provider: None,
        }
    }
}

impl ProviderConfig {
    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.network.base_url = Some(base_url.into());
        self
    }

    /// Add a header sent on every call.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.network.extra_headers.insert(name.into(), value.into());
        self
    }

    /// Enable raw response passthrough.
    #[must_use]
    pub const fn with_raw_response(mut self, enabled: bool) -> Self {
        self.send_back_raw_response = enabled;
        self
    }

    /// Make this a custom provider on top of `base_provider`.
    #[must_use]
    pub fn with_custom_provider(
        mut self,
        base_provider: ModelProvider,
        allowed_requests: Vec<Operation>,
    ) -> Self {
        self.custom_provider = Some(CustomProviderConfig {
            base_provider,
            allowed_requests,
        });
        self
    }

    /// Base URL for `provider`: the override, else the provider default,
    /// with trailing slashes removed.
    #[must_use]
    pub fn base_url(&self, provider: &ModelProvider) -> Option<String> {
        self.network
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| default_base_url(provider))
            .map(|u| u.trim_end_matches('/').to_owned())
    }

    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.network.timeout_secs)
    }

    /// Client settings for a transport dedicated to this provider.
    #[must_use]
    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig {
            proxy: self.proxy.clone(),
            ..TransportConfig::default()
        };
        if let Some(user_agent) = &self.network.user_agent {
            config.user_agent = Some(user_agent.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_defaults() {
        let config = ProviderConfig::default();
        assert_eq!(config.network.timeout_secs, 30);
        assert_eq!(config.stream_buffer_size, 5000);
        assert!(!config.send_back_raw_response);
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_base_url_override_is_trimmed() {
        let config = ProviderConfig::default().with_base_url("http://localhost:8080/");
        assert_eq!(
            config.base_url(&ModelProvider::OpenAi).as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(
            ProviderConfig::default().base_url(&ModelProvider::Anthropic).as_deref(),
            Some("https://api.anthropic.com")
        );
        assert!(ProviderConfig::default().base_url(&ModelProvider::Sgl).is_none());
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ProviderConfig = serde_json::from_value(serde_json::json!({
            "network": {"timeout_secs": 5, "extra_headers": {"x-team": "core"}},
            "custom_provider": {
                "base_provider": "openai",
                "allowed_requests": ["chat_completion", "chat_completion_stream"]
            }
        }))
        .unwrap();
        assert_eq!(config.network.timeout_secs, 5);
        assert_eq!(config.stream_buffer_size, 5000);
        let custom = config.custom_provider.unwrap();
        assert_eq!(custom.base_provider, ModelProvider::OpenAi);
        let allowed = custom.allowed().unwrap();
        assert!(allowed.contains(Operation::ChatCompletionStream));
        assert!(!allowed.contains(Operation::Embedding));
    }
}
