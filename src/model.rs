//! JSON wire types shared by the relay endpoint and its client.

use serde::{Deserialize, Serialize};

/// One chunk of transcription output as written to the downstream client.
///
/// Either a piece of transcript (`done == false`, non-empty `text`) or the
/// terminal marker (`done == true`, empty `text`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub done: bool,
}

impl Transcription {
    /// A non-terminal fragment.
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    /// The terminal marker that ends a successful stream.
    pub fn done() -> Self {
        Self {
            text: String::new(),
            done: true,
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Newline-terminated JSON, the framing used on the response stream.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = self.to_json()?;
        line.push('\n');
        Ok(line)
    }
}

/// JSON request body for the URL variant of the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionRequest {
    /// URL of the audio file to transcribe
    pub audio_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_format() {
        let json = Transcription::partial("Hello").to_json().unwrap();
        assert_eq!(json, r#"{"text":"Hello","done":false}"#);
    }

    #[test]
    fn test_done_marker_format() {
        let json = Transcription::done().to_json().unwrap();
        assert_eq!(json, r#"{"text":"","done":true}"#);
    }

    #[test]
    fn test_to_line_is_newline_terminated_single_line() {
        let line = Transcription::partial("multi\nline").to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1, "embedded newline must be escaped");
    }

    #[test]
    fn test_from_json_rejects_missing_fields() {
        assert!(Transcription::from_json(r#"{"text":"x"}"#).is_err());
        assert!(Transcription::from_json("not json").is_err());
    }

    #[test]
    fn test_request_parses_audio_url() {
        let request: TranscriptionRequest =
            serde_json::from_str(r#"{"audio_url":"https://example.com/a.mp3"}"#).unwrap();
        assert_eq!(request.audio_url, "https://example.com/a.mp3");
    }
}
