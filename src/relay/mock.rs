//! Scripted transcription client for tests and offline runs.

use crate::defaults;
use crate::error::RelayError;
use crate::relay::{RelayStreams, TranscriptionClient};
use crate::session::SessionContext;
use crate::upload::UploadDescriptor;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// How a scripted upstream finishes after its fragments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEnding {
    /// Close the fragment channel cleanly.
    Close,
    /// Report this error, then close.
    Fail(RelayError),
    /// Never finish on its own; wait for the session to end.
    Stall,
}

/// Mock client that replays a fixed list of fragments.
#[derive(Debug, Clone)]
pub struct MockTranscriptionClient {
    fragments: Vec<String>,
    ending: MockEnding,
    delay: Duration,
}

impl MockTranscriptionClient {
    pub fn new<S: Into<String>>(fragments: impl IntoIterator<Item = S>) -> Self {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: MockEnding::Close,
            delay: Duration::ZERO,
        }
    }

    /// Configure the mock to fail with `error` after its fragments
    pub fn with_failure(mut self, error: RelayError) -> Self {
        self.ending = MockEnding::Fail(error);
        self
    }

    /// Configure the mock to stall after its fragments
    pub fn with_stall(mut self) -> Self {
        self.ending = MockEnding::Stall;
        self
    }

    /// Wait this long before each fragment
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl TranscriptionClient for MockTranscriptionClient {
    fn stream_transcription(
        &self,
        ctx: SessionContext,
        _upload: UploadDescriptor,
    ) -> RelayStreams {
        let (fragment_tx, fragment_rx) = mpsc::channel(defaults::FRAGMENT_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = oneshot::channel();
        let script = self.clone();

        tokio::spawn(async move {
            let outcome = async {
                for fragment in script.fragments {
                    if !script.delay.is_zero() {
                        tokio::select! {
                            biased;
                            err = ctx.done() => return Some(err),
                            _ = tokio::time::sleep(script.delay) => {}
                        }
                    }
                    tokio::select! {
                        biased;
                        err = ctx.done() => return Some(err),
                        sent = fragment_tx.send(fragment) => {
                            if sent.is_err() {
                                return None;
                            }
                        }
                    }
                }
                match script.ending {
                    MockEnding::Close => None,
                    MockEnding::Fail(error) => Some(error),
                    MockEnding::Stall => Some(ctx.done().await),
                }
            }
            .await;

            if let Some(error) = outcome {
                // Receiver gone means the session already ended.
                error_tx.send(error).ok();
            }
            drop(fragment_tx);
        });

        RelayStreams {
            fragments: fragment_rx,
            error: error_rx,
        }
    }
}
