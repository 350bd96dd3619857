//! The uniform operation surface.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::common::{chat_to_responses, responses_to_chat};
use super::{ProviderConfig, ProviderParts, Target};
use crate::context::Context;
use crate::error::{BifrostError, Result};
use crate::schemas::{
    CanonicalRequest, CanonicalResponse, Capabilities, Key, ModelProvider, Operation,
};
use crate::streaming::{ChunkReceiver, PostHook, StreamSpec, spawn_stream};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// One provider behind the canonical operation surface.
///
/// Every operation exists for every provider. Operations the provider
/// does not serve fail with an unsupported-operation error before any
/// network I/O.
///
/// Streaming operations return once the upstream accepted the request;
/// later failures arrive as the error-terminal chunk of the channel.
#[derive(Debug, Clone)]
pub struct Provider {
    name: ModelProvider,
    base: ModelProvider,
    config: ProviderConfig,
    base_url: Option<String>,
    allowed: Option<Capabilities>,
    parts: ProviderParts,
    transport: Arc<dyn Transport>,
}

impl Provider {
    /// Assemble a façade.
    ///
    /// `name` is the provider callers address; `base` is the built-in
    /// provider whose strategies are used. They differ for custom providers.
    #[must_use]
    pub fn new(
        name: ModelProvider,
        base: ModelProvider,
        config: ProviderConfig,
        parts: ProviderParts,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let base_url = config.base_url(&base);
        let allowed = config
            .custom_provider
            .as_ref()
            .and_then(super::CustomProviderConfig::allowed);
        Self {
            name,
            base,
            config,
            base_url,
            allowed,
            parts,
            transport,
        }
    }

    /// Provider name.
    #[must_use]
    pub const fn name(&self) -> &ModelProvider {
        &self.name
    }

    /// Built-in provider whose wire format is used.
    #[must_use]
    pub const fn base(&self) -> &ModelProvider {
        &self.base
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Operations callers may use.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.parts.capabilities.iter().filter(|op| self.allows(*op)).collect()
    }

    fn allows(&self, operation: Operation) -> bool {
        self.allowed.is_none_or(|allowed| allowed.contains(operation))
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Legacy prompt completion.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn text_completion(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::TextCompletion).await
    }

    /// Streaming prompt completion.
    ///
    /// # Errors
    ///
    /// Gating and handshake errors.
    pub async fn text_completion_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.stream(ctx, key, request, Operation::TextCompletionStream, hook)
            .await
    }

    /// Chat completion.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn chat_completion(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::ChatCompletion).await
    }

    /// Streaming chat completion.
    ///
    /// # Errors
    ///
    /// Gating and handshake errors.
    pub async fn chat_completion_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.stream(ctx, key, request, Operation::ChatCompletionStream, hook)
            .await
    }

    /// Responses API.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn responses(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::Responses).await
    }

    /// Streaming Responses API.
    ///
    /// # Errors
    ///
    /// Gating and handshake errors.
    pub async fn responses_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.stream(ctx, key, request, Operation::ResponsesStream, hook)
            .await
    }

    /// Embeddings.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn embedding(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::Embedding).await
    }

    /// Text to speech.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn speech(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::Speech).await
    }

    /// Streaming text to speech.
    ///
    /// # Errors
    ///
    /// Gating and handshake errors.
    pub async fn speech_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.stream(ctx, key, request, Operation::SpeechStream, hook)
            .await
    }

    /// Speech to text.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn transcription(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::Transcription).await
    }

    /// Streaming speech to text.
    ///
    /// # Errors
    ///
    /// Gating and handshake errors.
    pub async fn transcription_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.stream(ctx, key, request, Operation::TranscriptionStream, hook)
            .await
    }

    /// Model listing.
    ///
    /// # Errors
    ///
    /// Gating, transport and upstream errors.
    pub async fn list_models(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
    ) -> Result<CanonicalResponse> {
        self.unary(ctx, key, request, Operation::ListModels).await
    }

    /// Run a unary operation by tag.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-operation error for streaming tags.
    pub async fn call(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        operation: Operation,
    ) -> Result<CanonicalResponse> {
        if operation.is_streaming() {
            return Err(BifrostError::unsupported(operation, &self.name));
        }
        self.unary(ctx, key, request, operation).await
    }

    /// Run a streaming operation by tag.
    ///
    /// # Errors
    ///
    /// Returns an unsupported-operation error for unary tags.
    pub async fn call_stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        operation: Operation,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        if !operation.is_streaming() {
            return Err(BifrostError::unsupported(operation, &self.name));
        }
        self.stream(ctx, key, request, operation, hook).await
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    /// Capability, then allow-list, then input shape.
    fn gate(&self, operation: Operation, request: &CanonicalRequest) -> Result<()> {
        if !self.parts.capabilities.contains(operation) {
            return Err(BifrostError::unsupported(operation, &self.name));
        }
        if !self.allows(operation) {
            return Err(BifrostError::configuration(
                &self.name,
                format!(
                    "{} is not allowed for custom provider {}",
                    operation.label(),
                    self.name
                ),
            ));
        }
        if !request.input.serves(operation) {
            return Err(BifrostError::configuration(
                &self.name,
                format!(
                    "{} input cannot be used for {}",
                    request.input.kind(),
                    operation.label()
                ),
            ));
        }
        Ok(())
    }

    fn target<'a>(&'a self, key: &'a Key, operation: Operation) -> Target<'a> {
        Target {
            provider: &self.name,
            operation,
            base_url: self.base_url.as_deref(),
            key,
        }
    }

    fn via_chat(&self, operation: Operation) -> bool {
        self.parts.responses_via_chat && operation.unary() == Operation::Responses
    }

    /// Add credentials, configured headers and the timeout.
    async fn prepare(&self, ctx: &Context, key: &Key, request: &mut HttpRequest) -> Result<()> {
        self.parts.auth.authorize(ctx, key, request).await?;
        for (name, value) in &self.config.network.extra_headers {
            if !request.headers.contains_key(name.as_str()) {
                request.set_header(name, value);
            }
        }
        request.timeout = Some(self.config.timeout());
        Ok(())
    }

    /// Turn a non-2xx response into an error, forgetting derived
    /// credentials the upstream rejected.
    fn reject(&self, key: &Key, response: &HttpResponse) -> BifrostError {
        let err = self
            .parts
            .responses
            .translate_error(&self.name, response)
            .with_provider(&self.name)
            .with_status(response.status);
        if err.is_auth_failure() {
            debug!(status = response.status, "upstream rejected credentials");
            self.parts.auth.invalidate(key);
        }
        warn!(status = response.status, error = %err, "upstream returned an error");
        err
    }

    #[instrument(
        name = "provider.unary",
        skip_all,
        fields(
            provider = %self.name,
            operation = %operation,
            model = %request.model,
            request_id = %ctx.request_id(),
        )
    )]
    async fn unary(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        operation: Operation,
    ) -> Result<CanonicalResponse> {
        self.gate(operation, request)?;

        if self.via_chat(operation) {
            let chat = responses_to_chat(request)
                .ok_or_else(|| BifrostError::configuration(&self.name, "responses input expected"))?;
            let response = self.send(ctx, key, &chat, Operation::ChatCompletion).await?;
            return Ok(chat_to_responses(response));
        }
        self.send(ctx, key, request, operation).await
    }

    async fn send(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        operation: Operation,
    ) -> Result<CanonicalResponse> {
        let target = self.target(key, operation);
        let mut http = self.parts.requests.translate(&target, request)?;
        self.prepare(ctx, key, &mut http).await?;

        let started = Instant::now();
        let response = self
            .transport
            .send(ctx, http)
            .await
            .map_err(|e| e.with_provider(&self.name))?;
        if !response.is_success() {
            return Err(self.reject(key, &response));
        }

        let mut canonical = self.parts.responses.translate(&target, request, &response)?;
        let extra = &mut canonical.extra_fields;
        extra.provider = self.name.clone();
        extra.model_requested.clone_from(&request.model);
        extra.latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        extra.params = serde_json::to_value(&request.params)
            .ok()
            .filter(|p| p.as_object().is_some_and(|o| !o.is_empty()));
        if self.config.send_back_raw_response {
            extra.raw_response = serde_json::from_slice(&response.body).ok();
        }
        debug!(latency_ms = extra.latency_ms, "call completed");
        Ok(canonical)
    }

    #[instrument(
        name = "provider.stream",
        skip_all,
        fields(
            provider = %self.name,
            operation = %operation,
            model = %request.model,
            request_id = %ctx.request_id(),
        )
    )]
    async fn stream(
        &self,
        ctx: &Context,
        key: &Key,
        request: &CanonicalRequest,
        operation: Operation,
        hook: Option<Arc<dyn PostHook>>,
    ) -> Result<ChunkReceiver> {
        self.gate(operation, request)?;

        let chat;
        let (request, wire_operation) = if self.via_chat(operation) {
            chat = responses_to_chat(request)
                .ok_or_else(|| BifrostError::configuration(&self.name, "responses input expected"))?;
            (&chat, Operation::ChatCompletionStream)
        } else {
            (request, operation)
        };

        let target = self.target(key, wire_operation);
        let mut http = self.parts.requests.translate(&target, request)?;
        self.prepare(ctx, key, &mut http).await?;

        let response = self
            .transport
            .send_streaming(ctx, http)
            .await
            .map_err(|e| e.with_provider(&self.name))?;
        if !response.is_success() {
            let full = response
                .collect(ctx)
                .await
                .map_err(|e| e.with_provider(&self.name))?;
            return Err(self.reject(key, &full));
        }

        let decoder = self.parts.decoders.decoder(&target, request);
        debug!(framing = ?decoder.framing(), "stream connected");
        let spec = StreamSpec {
            provider: self.name.clone(),
            model: request.model.clone(),
            operation,
            buffer_size: self.config.stream_buffer_size,
            raw_response: self.config.send_back_raw_response,
        };
        Ok(spawn_stream(ctx.clone(), response.body, decoder, hook, spec))
    }
}
