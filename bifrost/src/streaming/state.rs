//! Per-stream accumulator.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::BifrostError;
use crate::schemas::{ChunkDelta, StreamSummary, ToolCallDelta, Usage};

use super::StreamEvent;

/// Lifecycle of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Connected, nothing decoded yet.
    AwaitingFirstFrame,
    /// At least one frame decoded.
    Streaming,
    /// The terminal chunk is being produced.
    Terminating,
    /// The terminal chunk has been delivered.
    Closed,
}

/// What the stream task does after applying an event.
#[derive(Debug)]
pub enum Step {
    /// Nothing to send.
    Continue,
    /// Send a content chunk.
    Emit(ChunkDelta),
    /// End successfully.
    Finish,
    /// End with an error.
    Fail(BifrostError),
}

/// Mutable state of one stream, owned by its task.
#[derive(Debug)]
pub struct DecoderState {
    phase: Phase,
    message_id: Option<String>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    emitted: usize,
    started_at: Instant,
    last_chunk_at: Instant,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderState {
    /// Create state for a stream that just connected.
    #[must_use]
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            phase: Phase::AwaitingFirstFrame,
            message_id: None,
            usage: None,
            finish_reason: None,
            emitted: 0,
            started_at: now,
            last_chunk_at: now,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Upstream message id, once seen.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    /// Accumulated usage.
    #[must_use]
    pub const fn usage(&self) -> Option<Usage> {
        self.usage
    }

    /// Recorded finish reason.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Number of content chunks emitted so far.
    #[must_use]
    pub const fn emitted(&self) -> usize {
        self.emitted
    }

    /// Record that a frame arrived.
    pub fn frame_seen(&mut self) {
        if self.phase == Phase::AwaitingFirstFrame {
            self.phase = Phase::Streaming;
        }
    }

    /// Apply one decoded event.
    pub fn apply(&mut self, event: StreamEvent) -> Step {
        match event {
            StreamEvent::Start { id, role } => {
                if self.message_id.is_none() {
                    self.message_id = id;
                }
                role.map_or(Step::Continue, |role| Step::Emit(ChunkDelta::role(role)))
            }
            StreamEvent::Delta(delta) => Step::Emit(delta),
            StreamEvent::ToolCallStart { index, id, name } => Step::Emit(ChunkDelta {
                tool_call: Some(ToolCallDelta {
                    index,
                    id,
                    name: Some(name),
                    arguments: String::new(),
                }),
                ..ChunkDelta::default()
            }),
            StreamEvent::ToolCallArguments { index, fragment } => Step::Emit(ChunkDelta {
                tool_call: Some(ToolCallDelta {
                    index,
                    arguments: fragment,
                    ..ToolCallDelta::default()
                }),
                ..ChunkDelta::default()
            }),
            StreamEvent::Finish {
                reason,
                authoritative,
            } => {
                if authoritative || self.finish_reason.is_none() {
                    self.finish_reason = Some(reason);
                }
                Step::Continue
            }
            StreamEvent::Usage(usage) => {
                self.usage = Some(match self.usage {
                    Some(current) => current.merge_max(usage),
                    None => usage.merge_max(Usage::default()),
                });
                Step::Continue
            }
            StreamEvent::Raw(bytes) => Step::Emit(ChunkDelta::raw(bytes)),
            StreamEvent::Done => Step::Finish,
            StreamEvent::Error(err) => Step::Fail(err),
        }
    }

    /// Claim the next chunk index and the time since the previous chunk.
    pub fn next_chunk(&mut self) -> (usize, Duration) {
        let now = Instant::now();
        let latency = now.duration_since(self.last_chunk_at);
        self.last_chunk_at = now;
        let index = self.emitted;
        self.emitted += 1;
        (index, latency)
    }

    /// Move to `Terminating` and return the terminal index and total latency.
    pub fn terminate(&mut self) -> (usize, Duration) {
        self.phase = Phase::Terminating;
        (self.emitted, self.started_at.elapsed())
    }

    /// Mark the terminal chunk as delivered.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }

    /// Summary carried by the success terminal.
    #[must_use]
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            usage: self.usage,
            finish_reason: self.finish_reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::Role;

    #[test]
    fn test_usage_never_decreases() {
        let mut state = DecoderState::new();
        state.apply(StreamEvent::Usage(Usage::new(10, 40)));
        state.apply(StreamEvent::Usage(Usage::with_total(10, 12, 22)));
        let usage = state.usage().unwrap();
        assert_eq!(usage.completion_tokens, 40);
        assert_eq!(usage.total_tokens, 50);
    }

    #[test]
    fn test_finish_reason_first_write_wins() {
        let mut state = DecoderState::new();
        state.apply(StreamEvent::Finish {
            reason: "stop".into(),
            authoritative: false,
        });
        state.apply(StreamEvent::Finish {
            reason: "length".into(),
            authoritative: false,
        });
        assert_eq!(state.finish_reason(), Some("stop"));
        state.apply(StreamEvent::Finish {
            reason: "tool_calls".into(),
            authoritative: true,
        });
        assert_eq!(state.finish_reason(), Some("tool_calls"));
    }

    #[test]
    fn test_indices_start_at_zero() {
        let mut state = DecoderState::new();
        assert_eq!(state.phase(), Phase::AwaitingFirstFrame);
        state.frame_seen();
        assert_eq!(state.phase(), Phase::Streaming);
        assert_eq!(state.next_chunk().0, 0);
        assert_eq!(state.next_chunk().0, 1);
        assert_eq!(state.terminate().0, 2);
        assert_eq!(state.phase(), Phase::Terminating);
    }

    #[test]
    fn test_start_keeps_first_id() {
        let mut state = DecoderState::new();
        let step = state.apply(StreamEvent::Start {
            id: Some("a".into()),
            role: Some(Role::Assistant),
        });
        assert!(matches!(step, Step::Emit(d) if d.role == Some(Role::Assistant)));
        state.apply(StreamEvent::Start {
            id: Some("b".into()),
            role: None,
        });
        assert_eq!(state.message_id(), Some("a"));
    }
}
