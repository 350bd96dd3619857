//! Post-hooks applied to every streamed chunk.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::schemas::StreamChunk;

/// Transformation applied to each chunk before it reaches the consumer.
///
/// A hook may rewrite a chunk or replace it. Returning a terminal chunk
/// for a content chunk ends the stream with that terminal.
#[async_trait]
pub trait PostHook: Send + Sync + fmt::Debug {
    /// Transform one chunk.
    async fn on_chunk(&self, ctx: &Context, chunk: StreamChunk) -> StreamChunk;
}

/// Hooks run in order, stopping once a chunk becomes terminal.
#[derive(Debug, Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn PostHook>>,
}

impl HookChain {
    /// Create an empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Append a hook.
    #[must_use]
    pub fn with(mut self, hook: Arc<dyn PostHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Whether the chain has no hooks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[async_trait]
impl PostHook for HookChain {
    async fn on_chunk(&self, ctx: &Context, mut chunk: StreamChunk) -> StreamChunk {
        let started_terminal = chunk.is_terminal();
        for hook in &self.hooks {
            chunk = hook.on_chunk(ctx, chunk).await;
            if !started_terminal && chunk.is_terminal() {
                break;
            }
        }
        chunk
    }
}
