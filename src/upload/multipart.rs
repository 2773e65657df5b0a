//! Outbound `multipart/form-data` forms with a streamed file part.
//!
//! reqwest does the encoding; the file part reads from a [`PipeReader`] that
//! an [`UploadPump`](crate::upload::UploadPump) fills while the request is in
//! flight.

use crate::defaults;
use crate::error::RelayError;
use crate::upload::pipe::PipeReader;
use reqwest::multipart::{Form, Part};

const AUDIO_MIME: &str = "application/octet-stream";

/// Form holding only the streamed `file` part.
pub fn file_form(body: PipeReader, filename: &str) -> Result<Form, RelayError> {
    let part = Part::stream(reqwest::Body::wrap_stream(body))
        .file_name(upload_filename(filename))
        .mime_str(AUDIO_MIME)
        .map_err(|e| RelayError::Other(format!("failed to build audio part: {e}")))?;
    Ok(Form::new().part(defaults::FILE_FIELD, part))
}

/// The upstream form: file, then `model`, then `stream=true`.
pub fn transcription_form(
    body: PipeReader,
    filename: &str,
    model: &str,
) -> Result<Form, RelayError> {
    Ok(file_form(body, filename)?
        .text("model", model.to_string())
        .text("stream", "true"))
}

/// Filename declared for the file part. Line breaks are dropped and an empty
/// name falls back to a fixed one; quoting is left to the encoder.
pub fn upload_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .collect();
    if cleaned.trim().is_empty() {
        defaults::FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}
