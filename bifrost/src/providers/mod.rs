//! Provider adapters.
//!
//! Every provider is served by one generic [`Provider`] façade assembled
//! from per-provider strategies:
//!
//! - [`RequestTranslator`] - canonical request to upstream HTTP request
//! - [`ResponseTranslator`] - upstream body to canonical response, and
//!   upstream error bodies to [`BifrostError`]
//! - [`DecoderFactory`] - a fresh [`StreamDecoder`] per stream
//! - an [`Authenticator`]
//!
//! The [`ProviderRegistry`] maps each [`ModelProvider`] to its strategies.
//!
//! # Supported Providers
//!
//! - **`OpenAI`** and the `OpenAI`-compatible family: Azure, Mistral, Groq,
//!   Ollama, Cerebras, `OpenRouter`, Parasail, `SGLang`
//! - **Anthropic**, including raw passthrough mode
//! - **Bedrock** (Converse API, Titan and Cohere embeddings)
//! - **Vertex AI** (Anthropic publisher models and the `OpenAI`-compatible endpoint)
//! - **Gemini**
//! - **Cohere** v2

mod common;
mod config;
mod facade;
mod registry;

pub mod anthropic;
pub mod bedrock;
pub mod cohere;
pub mod gemini;
pub mod openai;
pub mod vertex;

pub use config::{
    CustomProviderConfig, DEFAULT_STREAM_BUFFER_SIZE, DEFAULT_TIMEOUT_SECS, NetworkConfig,
    ProviderConfig, default_base_url,
};
pub use facade::Provider;
pub use registry::{BuildContext, PartsBuilder, ProviderRegistry};

use std::fmt;
use std::sync::Arc;

use crate::auth::Authenticator;
use crate::error::{BifrostError, Result};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, Key, ModelProvider, Operation,
};
use crate::streaming::StreamDecoder;
use crate::transport::{HttpRequest, HttpResponse};

/// Where a translated request is going.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Provider name used in errors and responses.
    pub provider: &'a ModelProvider,
    /// Operation sent upstream.
    pub operation: Operation,
    /// Configured or default base URL.
    pub base_url: Option<&'a str>,
    /// Credential of the call.
    pub key: &'a Key,
}

impl Target<'_> {
    /// The base URL.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if none is configured.
    pub fn base_url(&self) -> Result<&str> {
        self.base_url.ok_or_else(|| {
            BifrostError::configuration(self.provider, "base url is not configured")
        })
    }

    /// `base_url` joined with `path`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no base URL is configured.
    pub fn url(&self, path: &str) -> Result<String> {
        Ok(format!("{}{path}", self.base_url()?))
    }

    /// Whether the upstream call streams.
    #[must_use]
    pub const fn streaming(&self) -> bool {
        self.operation.is_streaming()
    }
}

/// Canonical request to upstream HTTP request.
///
/// Translators are pure: no I/O, safe to call concurrently and repeatedly.
/// Missing required fields are rejected before any body is produced.
pub trait RequestTranslator: Send + Sync + fmt::Debug {
    /// Build the upstream request, without credentials.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing or incompatible fields,
    /// or a marshal error if the body cannot be encoded.
    fn translate(&self, target: &Target<'_>, request: &CanonicalRequest) -> Result<HttpRequest>;
}

/// Upstream response to canonical response.
pub trait ResponseTranslator: Send + Sync + fmt::Debug {
    /// Translate a 2xx response.
    ///
    /// # Errors
    ///
    /// Returns a response-unmarshal error if the body has the wrong shape.
    fn translate(
        &self,
        target: &Target<'_>,
        request: &CanonicalRequest,
        response: &HttpResponse,
    ) -> Result<CanonicalResponse>;

    /// Translate a non-2xx response.
    fn translate_error(&self, provider: &ModelProvider, response: &HttpResponse) -> BifrostError {
        common::parse_error(provider, response)
    }
}

/// Creates the decoder for one stream.
pub trait DecoderFactory: Send + Sync + fmt::Debug {
    /// A decoder for the stream about to start.
    fn decoder(&self, target: &Target<'_>, request: &CanonicalRequest) -> Box<dyn StreamDecoder>;
}

/// The strategies and capabilities of one provider.
#[derive(Debug, Clone)]
pub struct ProviderParts {
    /// Operations the provider serves.
    pub capabilities: Capabilities,
    /// Serve Responses operations through chat completion.
    pub responses_via_chat: bool,
    /// Credential handling.
    pub auth: Arc<dyn Authenticator>,
    /// Request translation.
    pub requests: Arc<dyn RequestTranslator>,
    /// Response translation.
    pub responses: Arc<dyn ResponseTranslator>,
    /// Stream decoding.
    pub decoders: Arc<dyn DecoderFactory>,
}

impl ProviderParts {
    /// Parts whose three strategies are one value.
    pub fn uniform<T>(capabilities: Capabilities, auth: Arc<dyn Authenticator>, dialect: T) -> Self
    where
        T: RequestTranslator + ResponseTranslator + DecoderFactory + 'static,
    {
        let dialect = Arc::new(dialect);
        Self {
            capabilities,
            responses_via_chat: false,
            auth,
            requests: dialect.clone(),
            responses: dialect.clone(),
            decoders: dialect,
        }
    }

    /// Serve Responses through chat completion.
    #[must_use]
    pub fn with_responses_via_chat(mut self) -> Self {
        self.capabilities = self.capabilities.union(Capabilities::RESPONSES);
        self.responses_via_chat = true;
        self
    }
}
