//! Multipart form bodies for audio uploads.
//!
//! Forms are kept as plain data until the transport sends them, so
//! translators stay pure and tests can inspect every field.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::error::{BifrostError, Result};

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    /// A text field.
    Text {
        /// Field name.
        name: String,
        /// Field value.
        value: String,
    },
    /// A file field.
    File {
        /// Field name.
        name: String,
        /// File name sent with the part.
        filename: String,
        /// MIME type of the part.
        mime: String,
        /// File contents.
        data: Bytes,
    },
}

impl FormPart {
    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// An ordered multipart form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    /// Fields in send order.
    pub parts: Vec<FormPart>,
}

impl MultipartForm {
    /// Create an empty form.
    #[must_use]
    pub const fn new() -> Self {
        Self { parts: Vec::new() }
    }

    /// Append a text field.
    #[must_use]
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(FormPart::Text {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Append a text field when the value is present.
    #[must_use]
    pub fn text_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) => self.text(name, v),
            None => self,
        }
    }

    /// Append a file field. The MIME type is guessed from the file name.
    #[must_use]
    pub fn file(mut self, name: impl Into<String>, filename: impl Into<String>, data: Bytes) -> Self {
        let filename = filename.into();
        let mime = mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_owned();
        self.parts.push(FormPart::File {
            name: name.into(),
            filename,
            mime,
            data,
        });
        self
    }

    /// Append provider-specific extra parameters.
    ///
    /// Arrays become repeated `key[]` fields, strings are sent as-is and
    /// every other value is sent as its JSON text.
    #[must_use]
    pub fn extra_params(mut self, extra: &Map<String, Value>) -> Self {
        for (key, value) in extra {
            match value {
                Value::Array(items) => {
                    let name = format!("{key}[]");
                    for item in items {
                        self = self.text(name.clone(), value_to_field(item));
                    }
                }
                Value::Null => {}
                other => self = self.text(key.clone(), value_to_field(other)),
            }
        }
        self
    }

    /// Value of the first text field with the given name.
    #[must_use]
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|p| match p {
            FormPart::Text { name: n, value } if n == name => Some(value.as_str()),
            _ => None,
        })
    }

    /// Values of every text field with the given name.
    #[must_use]
    pub fn text_values(&self, name: &str) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                FormPart::Text { name: n, value } if n == name => Some(value.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Convert into a `reqwest` form.
    ///
    /// # Errors
    ///
    /// Returns a transport error if a part's MIME type is invalid.
    pub fn into_reqwest(self) -> Result<reqwest::multipart::Form> {
        use reqwest::multipart::{Form, Part};

        self.parts
            .into_iter()
            .try_fold(Form::new(), |form, part| match part {
                FormPart::Text { name, value } => Ok(form.text(name, value)),
                FormPart::File {
                    name,
                    filename,
                    mime,
                    data,
                } => {
                    let part = Part::bytes(data.to_vec())
                        .file_name(filename)
                        .mime_str(&mime)
                        .map_err(|e| {
                            BifrostError::transport(None, format!("invalid multipart part: {e}"))
                                .with_source(e)
                        })?;
                    Ok(form.part(name, part))
                }
            })
    }
}

fn value_to_field(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_params_arrays_repeat() {
        let extra = serde_json::json!({
            "timestamp_granularities": ["word", "segment"],
            "temperature": 0.2,
            "label": "x",
            "skip": null
        });
        let form = MultipartForm::new().extra_params(extra.as_object().unwrap());
        assert_eq!(
            form.text_values("timestamp_granularities[]"),
            vec!["word", "segment"]
        );
        assert_eq!(form.text_value("temperature"), Some("0.2"));
        assert_eq!(form.text_value("label"), Some("x"));
        assert!(form.text_value("skip").is_none());
    }

    #[test]
    fn test_file_part_guesses_mime() {
        let form = MultipartForm::new().file("file", "audio.mp3", Bytes::from_static(b"ID3"));
        match &form.parts[0] {
            FormPart::File { mime, filename, .. } => {
                assert_eq!(filename, "audio.mp3");
                assert_eq!(mime, "audio/mpeg");
            }
            FormPart::Text { .. } => panic!("expected file part"),
        }
    }

    #[test]
    fn test_into_reqwest() {
        let form = MultipartForm::new()
            .file("file", "audio.wav", Bytes::from_static(b"RIFF"))
            .text("model", "whisper-1");
        assert!(form.into_reqwest().is_ok());
    }
}
