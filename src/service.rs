//! Transcription streaming service.
//!
//! Wraps a [`TranscriptionClient`] and merges its fragment and error channels
//! with the session context. Fragments are trimmed and empty ones dropped;
//! everything else is re-published in arrival order on a fresh channel pair.

use crate::defaults;
use crate::error::RelayError;
use crate::relay::{RelayStreams, TranscriptionClient};
use crate::session::SessionContext;
use crate::upload::UploadDescriptor;
use log::debug;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Output of one transcription session.
///
/// Same contract as [`RelayStreams`]: at most one error, delivered before
/// `texts` closes. `texts` closing with no error is a clean finish.
#[derive(Debug)]
pub struct TranscriptStreams {
    pub texts: mpsc::Receiver<String>,
    pub error: oneshot::Receiver<RelayError>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Upstream finished cleanly.
    Done,
    /// Upstream reported an error.
    Errored,
    /// Deadline passed, or the caller went away.
    Cancelled,
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::Done => write!(f, "done"),
            SessionOutcome::Errored => write!(f, "errored"),
            SessionOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Trait for services producing a cleaned transcript stream.
pub trait TranscriptionService: Send + Sync {
    fn transcribe_stream(&self, ctx: SessionContext, upload: UploadDescriptor)
    -> TranscriptStreams;
}

/// Multiplexer over a single upstream client.
#[derive(Clone)]
pub struct StreamService {
    client: Arc<dyn TranscriptionClient>,
}

impl StreamService {
    pub fn new(client: Arc<dyn TranscriptionClient>) -> Self {
        Self { client }
    }
}

impl TranscriptionService for StreamService {
    fn transcribe_stream(
        &self,
        ctx: SessionContext,
        upload: UploadDescriptor,
    ) -> TranscriptStreams {
        let raw = self.client.stream_transcription(ctx.clone(), upload);
        let (text_tx, text_rx) = mpsc::channel(defaults::OUTPUT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = multiplex(&ctx, raw, &text_tx, error_tx).await;
            debug!("Transcription session {outcome}");
            drop(text_tx);
        });

        TranscriptStreams {
            texts: text_rx,
            error: error_rx,
        }
    }
}

/// Event loop of one session. Priority when several sources are ready:
/// context, then upstream error, then fragments.
async fn multiplex(
    ctx: &SessionContext,
    raw: RelayStreams,
    texts: &mpsc::Sender<String>,
    error_tx: oneshot::Sender<RelayError>,
) -> SessionOutcome {
    let RelayStreams {
        mut fragments,
        mut error,
    } = raw;
    let mut error_closed = false;

    loop {
        tokio::select! {
            biased;
            err = ctx.done() => {
                report(error_tx, err);
                return SessionOutcome::Cancelled;
            }
            received = &mut error, if !error_closed => match received {
                Ok(err) => {
                    report(error_tx, err);
                    return SessionOutcome::Errored;
                }
                Err(_) => error_closed = true,
            },
            fragment = fragments.recv() => match fragment {
                Some(fragment) => {
                    let text = fragment.trim();
                    if text.is_empty() {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        err = ctx.done() => {
                            report(error_tx, err);
                            return SessionOutcome::Cancelled;
                        }
                        sent = texts.send(text.to_string()) => {
                            if sent.is_err() {
                                // Nobody is reading any more.
                                return SessionOutcome::Cancelled;
                            }
                        }
                    }
                }
                None => {
                    // The error, if any, was sent before the close.
                    if !error_closed && let Ok(err) = error.try_recv() {
                        report(error_tx, err);
                        return SessionOutcome::Errored;
                    }
                    return SessionOutcome::Done;
                }
            },
        }
    }
}

fn report(error_tx: oneshot::Sender<RelayError>, err: RelayError) {
    debug!("Session error: {err}");
    if error_tx.send(err).is_err() {
        debug!("Session error dropped: consumer already gone");
    }
}
