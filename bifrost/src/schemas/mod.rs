//! The canonical model shared by every provider adapter.
//!
//! - [`CanonicalRequest`] - what the caller asks for
//! - [`CanonicalResponse`] - what a unary operation returns
//! - [`StreamChunk`] - what a streaming operation delivers
//! - [`Key`] - the credential supplied per call

mod key;
mod provider;
mod request;
mod response;
mod stream;

pub use key::{AzureKeyConfig, BedrockKeyConfig, Key, KeyConfig, VertexKeyConfig};
pub use provider::{Capabilities, ModelProvider, Operation};
pub use request::{
    CanonicalRequest, ChatMessage, Content, ContentBlock, EmbeddingInput, ImageSource,
    ListModelsInput, Params, PassthroughRequest, RequestInput, ResponsesInput, Role,
    SpeechInput, TextInput, Tool, ToolCall, ToolChoice, TranscriptionInput,
};
pub use response::{
    AssistantMessage, CanonicalResponse, Choice, Embedding, ExtraFields, ModelInfo, OutputItem,
    ResponseOutput, SpeechOutput, Transcript, TranscriptSegment, TranscriptWord, Usage,
    approximate_tokens,
};
pub use stream::{ChunkDelta, ChunkKind, StreamChunk, StreamSummary, ToolCallDelta};
