//! Stream decoding and delivery.
//!
//! Upstream bodies are cut into [`Frame`]s by a framer ([`sse`], [`brace`]
//! or [`passthrough`]), interpreted by a provider's [`StreamDecoder`] into
//! [`StreamEvent`]s, folded into a [`DecoderState`] and delivered as
//! [`StreamChunk`](crate::schemas::StreamChunk)s through an optional
//! [`PostHook`] into a bounded channel.
//!
//! ```text
//! bytes -> FrameReader -> Frame -> StreamDecoder -> StreamEvent
//!       -> DecoderState -> PostHook -> mpsc channel -> caller
//! ```

pub mod brace;
pub mod passthrough;
pub mod sse;

mod decoder;
mod hook;
mod pump;
mod state;

pub use decoder::{Frame, FrameReader, Framing, StreamDecoder, StreamEvent, parse_payload};
pub use hook::{HookChain, PostHook};
pub use pump::{ChunkReceiver, StreamSpec, spawn_stream};
pub use state::{DecoderState, Phase, Step};
