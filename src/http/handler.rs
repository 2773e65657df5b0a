//! `POST /api/transcribe`: accepts an upload and streams back
//! newline-delimited transcription JSON.

use crate::defaults;
use crate::error::{RelayError, Result};
use crate::http::AppState;
use crate::model::{Transcription, TranscriptionRequest};
use crate::session::{SessionContext, SessionHandle};
use crate::upload::source::channel_stream;
use crate::upload::{UploadDescriptor, remote};
use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::multipart::Field;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use futures_util::stream;
use log::{debug, error, warn};
use std::convert::Infallible;
use std::io;
use tokio::sync::{mpsc, oneshot};

/// Handle one transcription request.
///
/// Input errors are answered with 400 before any streaming starts, and an
/// upload whose file field misses the deadline with 408. Once the 200 is
/// sent, a failure simply ends the body without the done marker.
pub async fn transcribe(State(state): State<AppState>, request: Request) -> Result<Response> {
    let (ctx, handle) = SessionContext::with_timeout(state.request_timeout);
    let upload = if is_json(&request) {
        json_upload(request, &state).await?
    } else {
        multipart_upload(request, &state, &ctx).await?
    };
    debug!("Accepted upload: {}", upload.filename);

    let streams = state.service.transcribe_stream(ctx, upload);

    let body = ResponseBody {
        texts: streams.texts,
        error: Some(streams.error),
        finished: false,
        _session: handle,
    };
    let body = Body::from_stream(stream::unfold(body, ResponseBody::next));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

async fn json_upload(request: Request, state: &AppState) -> Result<UploadDescriptor> {
    let Json(payload) = Json::<TranscriptionRequest>::from_request(request, state)
        .await
        .map_err(|rejection| RelayError::InvalidRequest {
            message: rejection.body_text(),
        })?;

    let url = reqwest::Url::parse(payload.audio_url.trim()).map_err(|e| {
        RelayError::InvalidRequest {
            message: format!("invalid audio_url: {e}"),
        }
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidRequest {
            message: format!("unsupported audio_url scheme: {}", url.scheme()),
        });
    }
    if remote::is_local_host(&url) {
        return Err(RelayError::InvalidRequest {
            message: "audio_url must not point at a local or private address".to_string(),
        });
    }
    Ok(UploadDescriptor::from_url(url.to_string()))
}

/// Spawn the feeder for the inbound multipart body and wait until it has
/// found the file field (or failed to, or the session ended).
async fn multipart_upload(
    request: Request,
    state: &AppState,
    ctx: &SessionContext,
) -> Result<UploadDescriptor> {
    let multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| RelayError::MalformedUpload {
            message: rejection.body_text(),
        })?;

    let (filename_tx, filename_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel(defaults::UPLOAD_CHANNEL_CAPACITY);
    tokio::spawn(feed_upload(multipart, ctx.clone(), filename_tx, chunk_tx));

    let filename = tokio::select! {
        biased;
        err = ctx.done() => return Err(err),
        filename = filename_rx => filename,
    };
    let filename = filename.map_err(|_| RelayError::MalformedUpload {
        message: "upload ended unexpectedly".to_string(),
    })??;
    Ok(UploadDescriptor::from_stream(channel_stream(chunk_rx), filename))
}

/// Find the `file` field and hand it to [`forward_field`]. Other fields are
/// skipped.
async fn feed_upload(
    mut multipart: Multipart,
    ctx: SessionContext,
    filename_tx: oneshot::Sender<Result<String>>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
) {
    loop {
        let next = tokio::select! {
            biased;
            err = ctx.done() => {
                debug!("Upload intake stopped before the file field: {err}");
                return;
            }
            next = multipart.next_field() => next,
        };
        match next {
            Ok(Some(field)) if field.name() == Some(defaults::FILE_FIELD) => {
                forward_field(field, &ctx, filename_tx, chunks).await;
                return;
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                filename_tx.send(Err(RelayError::MissingFile)).ok();
                return;
            }
            Err(e) => {
                filename_tx
                    .send(Err(RelayError::MalformedUpload {
                        message: e.body_text(),
                    }))
                    .ok();
                return;
            }
        }
    }
}

/// Forward one field's chunks until it ends, the body breaks, the pump stops
/// reading, or the session ends. Returning drops the inbound body, which
/// closes a connection whose client stalled mid-upload.
async fn forward_field(
    mut field: Field<'_>,
    ctx: &SessionContext,
    filename_tx: oneshot::Sender<Result<String>>,
    chunks: mpsc::Sender<io::Result<Bytes>>,
) {
    let filename = field
        .file_name()
        .filter(|name| !name.is_empty())
        .unwrap_or(defaults::FALLBACK_FILENAME)
        .to_string();
    if filename_tx.send(Ok(filename)).is_err() {
        return;
    }

    loop {
        let next = tokio::select! {
            biased;
            err = ctx.done() => {
                debug!("Upload intake stopped: {err}");
                return;
            }
            _ = chunks.closed() => {
                debug!("Upload consumer gone, dropping remaining body");
                return;
            }
            next = field.chunk() => next,
        };
        match next {
            Ok(Some(chunk)) => {
                if chunks.send(Ok(chunk)).await.is_err() {
                    debug!("Upload consumer gone, dropping remaining body");
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                chunks.send(Err(io::Error::other(e.body_text()))).await.ok();
                return;
            }
        }
    }
}

fn log_stream_error(err: &RelayError) {
    if err.is_cancellation() {
        warn!("Transcription stream stopped: {err}");
    } else {
        error!("Transcription stream failed: {err}");
    }
}

/// State of the streaming response body. Owns the session handle, so
/// dropping the body (client gone) cancels the session.
struct ResponseBody {
    texts: mpsc::Receiver<String>,
    error: Option<oneshot::Receiver<RelayError>>,
    finished: bool,
    _session: SessionHandle,
}

impl ResponseBody {
    async fn next(mut self) -> Option<(std::result::Result<Bytes, Infallible>, Self)> {
        if self.finished {
            return None;
        }
        let line = match self.texts.recv().await {
            Some(text) => {
                // A session error beats a fragment that raced it.
                if let Some(err) = self.poll_error() {
                    log_stream_error(&err);
                    return None;
                }
                Transcription::partial(text)
            }
            None => {
                if let Some(err) = self.final_error().await {
                    log_stream_error(&err);
                    return None;
                }
                self.finished = true;
                Transcription::done()
            }
        };
        match line.to_line() {
            Ok(line) => Some((Ok(Bytes::from(line)), self)),
            Err(e) => {
                error!("Failed to encode transcription: {e}");
                None
            }
        }
    }

    fn poll_error(&mut self) -> Option<RelayError> {
        let rx = self.error.as_mut()?;
        match rx.try_recv() {
            Ok(err) => {
                self.error = None;
                Some(err)
            }
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                self.error = None;
                None
            }
        }
    }

    async fn final_error(&mut self) -> Option<RelayError> {
        self.error.take()?.await.ok()
    }
}
