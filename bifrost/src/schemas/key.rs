//! Credentials supplied per call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ModelProvider;

/// A credential for one provider account.
///
/// `value` carries the bearer token or API key; provider-specific
/// material lives in [`KeyConfig`]. The secret parts are never printed by
/// the `Debug` implementation.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Key {
    /// Stable identifier of the key.
    #[serde(default)]
    pub id: String,
    /// Bearer token or API key.
    #[serde(default)]
    pub value: String,
    /// Models this key may serve. Empty means all models.
    #[serde(default)]
    pub models: Vec<String>,
    /// Relative weight for key selection.
    #[serde(default = "default_weight")]
    pub weight: f64,
    /// Provider-specific credential material.
    #[serde(default)]
    pub config: KeyConfig,
}

const fn default_weight() -> f64 {
    1.0
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("value", &"[REDACTED]")
            .field("models", &self.models)
            .field("weight", &self.weight)
            .field("config", &self.config)
            .finish()
    }
}

impl Key {
    /// Create a key with a bearer token or API key.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            weight: default_weight(),
            ..Self::default()
        }
    }

    /// Attach provider-specific configuration.
    #[must_use]
    pub fn with_config(mut self, config: KeyConfig) -> Self {
        self.config = config;
        self
    }

    /// Restrict the key to the given models.
    #[must_use]
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Read the key from the conventional `<PROVIDER>_API_KEY` variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    #[must_use]
    pub fn from_env(provider: &ModelProvider) -> Option<Self> {
        let var = format!(
            "{}_API_KEY",
            provider.as_str().to_ascii_uppercase().replace('-', "_")
        );
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    /// Whether the key may serve the given model.
    #[must_use]
    pub fn supports_model(&self, model: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model)
    }

    /// Azure configuration, if present.
    #[must_use]
    pub const fn azure(&self) -> Option<&AzureKeyConfig> {
        match &self.config {
            KeyConfig::Azure(c) => Some(c),
            _ => None,
        }
    }

    /// Vertex configuration, if present.
    #[must_use]
    pub const fn vertex(&self) -> Option<&VertexKeyConfig> {
        match &self.config {
            KeyConfig::Vertex(c) => Some(c),
            _ => None,
        }
    }

    /// Bedrock configuration, if present.
    #[must_use]
    pub const fn bedrock(&self) -> Option<&BedrockKeyConfig> {
        match &self.config {
            KeyConfig::Bedrock(c) => Some(c),
            _ => None,
        }
    }
}

/// Provider-specific credential material.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum KeyConfig {
    /// Bearer token only.
    #[default]
    None,
    /// Azure endpoint and per-model deployment names.
    Azure(AzureKeyConfig),
    /// Vertex project, region and service-account credentials.
    Vertex(VertexKeyConfig),
    /// AWS credentials, region and per-model deployments.
    Bedrock(BedrockKeyConfig),
}

/// Azure `OpenAI` resource configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AzureKeyConfig {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: String,
    /// Model name to deployment name.
    #[serde(default)]
    pub deployments: HashMap<String, String>,
    /// API version query parameter.
    #[serde(default)]
    pub api_version: Option<String>,
    /// Send the key as an Entra ID bearer token instead of `api-key`.
    #[serde(default)]
    pub use_bearer_token: bool,
}

/// Vertex AI project configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexKeyConfig {
    /// Google Cloud project id.
    pub project_id: String,
    /// Region, e.g. `us-central1`.
    pub region: String,
    /// Service-account or authorized-user JSON. Empty means ambient credentials.
    #[serde(default)]
    pub auth_credentials: String,
}

impl fmt::Debug for VertexKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexKeyConfig")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .field("auth_credentials", &"[REDACTED]")
            .finish()
    }
}

/// AWS Bedrock configuration.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedrockKeyConfig {
    /// Access key id. Empty means ambient credentials.
    #[serde(default)]
    pub access_key: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_key: String,
    /// Session token for temporary credentials.
    #[serde(default)]
    pub session_token: Option<String>,
    /// Region, defaults to `us-east-1`.
    #[serde(default)]
    pub region: Option<String>,
    /// Inference profile ARN prefix.
    #[serde(default)]
    pub arn: Option<String>,
    /// Model name to model id or inference profile id.
    #[serde(default)]
    pub deployments: HashMap<String, String>,
}

impl fmt::Debug for BedrockKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BedrockKeyConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("region", &self.region)
            .field("arn", &self.arn)
            .field("deployments", &self.deployments)
            .finish_non_exhaustive()
    }
}
