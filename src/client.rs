//! Downstream client for a running relay.
//!
//! Uploads a local file through the same pump and pipe the relay uses
//! upstream, then reads the newline-delimited JSON response. A stream
//! counts as complete only if it ends with the done marker.

use crate::defaults;
use crate::error::{RelayError, Result};
use crate::model::Transcription;
use crate::relay::lines::LineDecoder;
use crate::session::SessionContext;
use crate::upload::source::reader_stream;
use crate::upload::{PipeFault, UploadDescriptor, UploadPump, file_form, pipe};
use futures_util::StreamExt;
use log::{debug, warn};
use reqwest::multipart::Form;
use std::path::Path;
use std::time::Duration;

/// Everything received from one transcription stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptOutcome {
    pub fragments: Vec<String>,
    /// True when the done marker arrived.
    pub complete: bool,
}

impl TranscriptOutcome {
    /// Fragments joined with single spaces.
    pub fn text(&self) -> String {
        self.fragments.join(" ")
    }
}

/// Client for the relay's transcription endpoint.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl RelayClient {
    /// `server` is the relay's base URL, e.g. `http://127.0.0.1:8080`.
    pub fn new(server: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: format!(
                "{}{}",
                server.trim_end_matches('/'),
                defaults::TRANSCRIBE_ROUTE
            ),
            timeout: defaults::REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Upload the file at `path`, calling `on_fragment` for each fragment as
    /// it arrives.
    pub async fn transcribe_file<F>(
        &self,
        path: &Path,
        on_fragment: F,
    ) -> Result<TranscriptOutcome>
    where
        F: FnMut(&str),
    {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| RelayError::Io {
                message: format!("Failed to open {}: {e}", path.display()),
            })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| defaults::FALLBACK_FILENAME.to_string());
        let upload = UploadDescriptor::from_stream(reader_stream(file), filename);
        self.transcribe(upload, on_fragment).await
    }

    /// Upload `upload` and stream the transcript back.
    pub async fn transcribe<F>(
        &self,
        upload: UploadDescriptor,
        mut on_fragment: F,
    ) -> Result<TranscriptOutcome>
    where
        F: FnMut(&str),
    {
        let (ctx, _session) = SessionContext::with_timeout(self.timeout);
        let UploadDescriptor { content, filename } = upload;
        let (writer, reader) = pipe(defaults::PIPE_CAPACITY);
        let fault = reader.fault();
        let form = file_form(reader, &filename)?;
        let pump_task = tokio::spawn({
            let ctx = ctx.clone();
            async move { UploadPump::new().run(ctx, content, writer).await }
        });

        let result = self.exchange(&ctx, form, &fault, &mut on_fragment).await;
        pump_task.abort();
        result
    }

    async fn exchange<F>(
        &self,
        ctx: &SessionContext,
        form: Form,
        fault: &PipeFault,
        on_fragment: &mut F,
    ) -> Result<TranscriptOutcome>
    where
        F: FnMut(&str),
    {
        debug!("Uploading to {}", self.endpoint);
        let request = self.http.post(&self.endpoint).multipart(form);
        let sent = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            sent = request.send() => sent,
        };
        let response = sent.map_err(|e| match fault.take() {
            Some(err @ RelayError::UploadSource { .. }) => err,
            _ => RelayError::UpstreamRequest {
                message: e.to_string(),
            },
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut outcome = TranscriptOutcome::default();
        let mut decoder = LineDecoder::new(defaults::MAX_LINE_BYTES);
        let mut stream = response.bytes_stream();
        loop {
            let chunk = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for line in decoder.push(&bytes)? {
                        record(&mut outcome, &line, on_fragment);
                    }
                }
                Some(Err(e)) => {
                    // Relay closed the stream early; what arrived still counts.
                    warn!("Stream interrupted: {e}");
                    break;
                }
                None => break,
            }
        }
        if let Some(line) = decoder.finish() {
            record(&mut outcome, &line, on_fragment);
        }
        Ok(outcome)
    }
}

fn record<F: FnMut(&str)>(outcome: &mut TranscriptOutcome, line: &str, on_fragment: &mut F) {
    if line.trim().is_empty() {
        return;
    }
    match Transcription::from_json(line) {
        Ok(t) if t.done => outcome.complete = true,
        Ok(t) => {
            on_fragment(&t.text);
            outcome.fragments.push(t.text);
        }
        Err(e) => warn!("Ignoring malformed line {line:?}: {e}"),
    }
}
