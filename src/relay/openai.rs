//! OpenAI-compatible streaming transcription client.

use crate::defaults;
use crate::error::RelayError;
use crate::relay::lines::LineDecoder;
use crate::relay::{RelayStreams, TranscriptionClient};
use crate::session::SessionContext;
use crate::upload::{UploadDescriptor, UploadPump, pipe, transcription_form};
use futures_util::StreamExt;
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Client for `POST /v1/audio/transcriptions` with `stream=true`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(api_key, defaults::UPSTREAM_URL, defaults::MODEL)
    }

    pub fn with_endpoint(
        api_key: impl Into<String>,
        url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            url: url.into(),
            model: model.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run one upstream request, forwarding response lines into `fragments`.
    async fn relay(
        &self,
        ctx: &SessionContext,
        upload: UploadDescriptor,
        fragments: &mpsc::Sender<String>,
    ) -> Result<(), RelayError> {
        let UploadDescriptor { content, filename } = upload;
        debug!("Audio file: {filename}");

        let (writer, reader) = pipe(defaults::PIPE_CAPACITY);
        let fault = reader.fault();
        let form = transcription_form(reader, &filename, &self.model)?;
        let _pump = AbortOnDrop(tokio::spawn({
            let ctx = ctx.clone();
            async move {
                if let Err(e) = UploadPump::new().run(ctx, content, writer).await {
                    debug!("Upload pump stopped: {e}");
                }
            }
        }));

        let request = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form);

        debug!("Sending request to {}", self.url);
        let sent = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            sent = request.send() => sent,
        };
        // A source failure breaks the body; report it instead of the
        // transport error it caused.
        let response = sent.map_err(|e| match fault.take() {
            Some(err @ RelayError::UploadSource { .. }) => err,
            _ => RelayError::UpstreamRequest {
                message: e.to_string(),
            },
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                body = response.text() => body.unwrap_or_default(),
            };
            let body = truncate(body, defaults::MAX_ERROR_BODY_BYTES);
            warn!("Upstream responded with status {status}: {body}");
            return Err(RelayError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let mut body = response.bytes_stream();
        let mut decoder = LineDecoder::new(defaults::MAX_LINE_BYTES);
        loop {
            let chunk = tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    for line in decoder.push(&bytes)? {
                        forward(ctx, fragments, line).await?;
                    }
                }
                Some(Err(e)) => {
                    return Err(RelayError::UpstreamRead {
                        message: e.to_string(),
                    });
                }
                None => break,
            }
        }
        if let Some(line) = decoder.finish() {
            forward(ctx, fragments, line).await?;
        }
        Ok(())
    }
}

impl TranscriptionClient for OpenAiClient {
    fn stream_transcription(
        &self,
        ctx: SessionContext,
        upload: UploadDescriptor,
    ) -> RelayStreams {
        let (fragment_tx, fragment_rx) = mpsc::channel(defaults::FRAGMENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = oneshot::channel();
        let client = self.clone();

        tokio::spawn(async move {
            if let Err(e) = client.relay(&ctx, upload, &fragment_tx).await
                && error_tx.send(e).is_err()
            {
                debug!("Relay error dropped: session already finished");
            }
            // Error first, then close: consumers rely on this order.
            drop(fragment_tx);
        });

        RelayStreams {
            fragments: fragment_rx,
            error: error_rx,
        }
    }
}

/// Send one fragment, giving up if the session ends first.
async fn forward(
    ctx: &SessionContext,
    fragments: &mpsc::Sender<String>,
    line: String,
) -> Result<(), RelayError> {
    tokio::select! {
        biased;
        err = ctx.done() => Err(err),
        sent = fragments.send(line) => sent.map_err(|_| RelayError::Cancelled),
    }
}

fn truncate(mut body: String, max: usize) -> String {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    body
}

/// Aborts the wrapped task when the relay exits on any path.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}
