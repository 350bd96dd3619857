#![cfg_attr(docsrs, feature(doc_cfg))]
//! Bifrost is a gateway that puts heterogeneous LLM provider APIs behind one
//! canonical request/response/stream schema.
//!
//! Each provider is a [`Provider`](providers::Provider) façade assembled from
//! three strategies (request translation, response translation and stream
//! decoding) plus an authenticator, all running over a pluggable
//! [`Transport`](transport::Transport). Streaming operations hand back a
//! bounded channel of [`StreamChunk`]s that always ends with exactly one
//! terminal chunk.
//!
//! ```rust,ignore
//! use bifrost::prelude::*;
//!
//! let provider = ProviderRegistry::new().build(
//!     &ModelProvider::OpenAi,
//!     ProviderConfig::default(),
//!     transport,
//! )?;
//! let request = CanonicalRequest::chat(
//!     ModelProvider::OpenAi,
//!     "gpt-4o-mini",
//!     vec![ChatMessage::user("Say hi")],
//! );
//! let response = provider
//!     .chat_completion(&Context::new(), &Key::new("sk-..."), &request)
//!     .await?;
//! ```

pub mod auth;
pub mod context;
pub mod error;
pub mod gateway;
pub mod prelude;
pub mod providers;
pub mod schemas;
pub mod streaming;
pub mod transport;

pub use context::Context;
pub use error::{BifrostError, ErrorKind, Result};
pub use gateway::{Account, Gateway};
pub use schemas::{
    CanonicalRequest, CanonicalResponse, Key, ModelProvider, Operation, StreamChunk,
};
