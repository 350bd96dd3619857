//! Speech synthesis and transcription.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::providers::common::{insert_opt, merge_extra};
use crate::schemas::{
    Params, SpeechInput, SpeechOutput, Transcript, TranscriptSegment, TranscriptWord,
    TranscriptionInput, Usage, approximate_tokens,
};
use crate::transport::{HttpResponse, MultipartForm};

/// File name used when the caller gives none.
pub(crate) const DEFAULT_AUDIO_FILENAME: &str = "audio.mp3";

/// Formats for which the upstream answers with plain text.
const TEXT_FORMATS: [&str; 3] = ["text", "srt", "vtt"];

/// `/v1/audio/speech` body.
pub(crate) fn speech_body(model: &str, input: &SpeechInput, params: &Params, stream: bool) -> Value {
    let mut body = Map::new();
    body.insert("model".into(), json!(model));
    body.insert("input".into(), json!(input.input));
    body.insert("voice".into(), json!(input.voice));
    insert_opt(&mut body, "instructions", input.instructions.as_deref());
    insert_opt(&mut body, "response_format", input.response_format.as_deref());
    if stream {
        body.insert("stream_format".into(), json!("sse"));
    }
    merge_extra(&mut body, params);
    Value::Object(body)
}

/// Canonical speech output from the raw audio body.
pub(crate) fn speech_output(input: &SpeechInput, response: &HttpResponse) -> SpeechOutput {
    SpeechOutput {
        audio: response.body.clone(),
        format: response
            .header_str("content-type")
            .map(str::to_owned)
            .or_else(|| input.response_format.clone()),
    }
}

/// `/v1/audio/transcriptions` multipart form.
pub(crate) fn transcription_form(
    model: &str,
    input: &TranscriptionInput,
    params: &Params,
    stream: bool,
) -> MultipartForm {
    let filename = input
        .filename
        .as_deref()
        .unwrap_or(DEFAULT_AUDIO_FILENAME);
    let mut form = MultipartForm::new()
        .file("file", filename, input.file.clone())
        .text("model", model)
        .text_opt("language", input.language.as_deref())
        .text_opt("prompt", input.prompt.as_deref())
        .text_opt("response_format", input.response_format.as_deref());
    if stream {
        form = form.text("stream", "true");
    }
    form.extra_params(&params.extra)
}

/// Whether the requested format yields a plain-text body.
pub(crate) fn is_text_format(input: &TranscriptionInput) -> bool {
    input
        .response_format
        .as_deref()
        .is_some_and(|f| TEXT_FORMATS.contains(&f))
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    #[serde(default)]
    id: u32,
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WireWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct WireTranscriptUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// A JSON transcription response.
#[derive(Debug, Deserialize)]
pub(crate) struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<WireSegment>,
    #[serde(default)]
    words: Vec<WireWord>,
    #[serde(default)]
    usage: Option<WireTranscriptUsage>,
}

impl TranscriptionResponse {
    /// A response for a plain-text body.
    pub(crate) fn plain(text: &[u8]) -> Self {
        Self {
            text: String::from_utf8_lossy(text).into_owned(),
            language: None,
            duration: None,
            segments: Vec::new(),
            words: Vec::new(),
            usage: None,
        }
    }

    /// Canonical transcript and usage. Missing usage is approximated.
    pub(crate) fn into_transcript(self) -> (Transcript, Usage) {
        let usage = self.usage.map_or_else(
            || Usage::new(0, approximate_tokens(&self.text)),
            |u| Usage::with_total(u.input_tokens, u.output_tokens, u.total_tokens),
        );
        let transcript = Transcript {
            text: self.text,
            language: self.language,
            duration: self.duration,
            segments: self
                .segments
                .into_iter()
                .map(|s| TranscriptSegment {
                    id: s.id,
                    start: s.start,
                    end: s.end,
                    text: s.text,
                })
                .collect(),
            words: self
                .words
                .into_iter()
                .map(|w| TranscriptWord {
                    word: w.word,
                    start: w.start,
                    end: w.end,
                })
                .collect(),
        };
        (transcript, usage)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn transcription_input() -> TranscriptionInput {
        TranscriptionInput {
            file: Bytes::from_static(b"RIFF"),
            filename: None,
            language: Some("en".into()),
            prompt: None,
            response_format: Some("srt".into()),
        }
    }

    #[test]
    fn test_transcription_form_fields() {
        let form = transcription_form("whisper-1", &transcription_input(), &Params::default(), true);
        assert_eq!(form.text_value("model"), Some("whisper-1"));
        assert_eq!(form.text_value("language"), Some("en"));
        assert_eq!(form.text_value("stream"), Some("true"));
        assert!(form.text_value("prompt").is_none());
        assert!(is_text_format(&transcription_input()));
    }

    #[test]
    fn test_speech_body() {
        let input = SpeechInput {
            input: "hello".into(),
            voice: "alloy".into(),
            instructions: None,
            response_format: Some("wav".into()),
        };
        let body = speech_body("tts-1", &input, &Params::default(), false);
        assert_eq!(
            body,
            json!({"model": "tts-1", "input": "hello", "voice": "alloy", "response_format": "wav"})
        );
    }

    #[test]
    fn test_transcript_usage_is_approximated() {
        let (transcript, usage) = TranscriptionResponse::plain(b"one two three four").into_transcript();
        assert_eq!(transcript.text, "one two three four");
        assert_eq!(usage.completion_tokens, 5);
    }
}
