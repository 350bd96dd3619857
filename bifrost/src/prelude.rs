//! Common imports.
//!
//! ```rust,ignore
//! use bifrost::prelude::*;
//! ```

pub use crate::context::Context;
pub use crate::error::{BifrostError, ErrorKind, Result};
pub use crate::gateway::{Account, Gateway};
pub use crate::providers::{Provider, ProviderConfig, ProviderRegistry};
pub use crate::schemas::{
    CanonicalRequest, CanonicalResponse, ChatMessage, ChunkDelta, ChunkKind, Key, KeyConfig,
    ModelProvider, Operation, Params, RequestInput, ResponseOutput, StreamChunk, Tool,
    ToolChoice, Usage,
};
pub use crate::streaming::{ChunkReceiver, HookChain, PostHook};
pub use crate::transport::{ReqwestTransport, Transport, TransportConfig};
