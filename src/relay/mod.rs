//! Upstream leg: sends the upload to the transcription service and reads its
//! line-delimited response back as fragments.

pub mod lines;
pub mod mock;
pub mod openai;

use crate::error::RelayError;
use crate::session::SessionContext;
use crate::upload::UploadDescriptor;
use tokio::sync::{mpsc, oneshot};

pub use mock::{MockEnding, MockTranscriptionClient};
pub use openai::OpenAiClient;

/// Raw output of one upstream request.
///
/// `fragments` yields response lines in arrival order. `error` yields at most
/// one error, always before `fragments` closes. If `error` closes without a
/// value, the upstream finished cleanly.
#[derive(Debug)]
pub struct RelayStreams {
    pub fragments: mpsc::Receiver<String>,
    pub error: oneshot::Receiver<RelayError>,
}

/// Trait for streaming transcription backends.
///
/// Implementations start their work in the background and return
/// immediately; the session context bounds how long that work may run.
pub trait TranscriptionClient: Send + Sync {
    fn stream_transcription(&self, ctx: SessionContext, upload: UploadDescriptor)
    -> RelayStreams;
}
