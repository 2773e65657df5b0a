//! voxrelay - Streaming speech-to-text relay
//!
//! Accepts an audio upload over HTTP, streams it to a remote transcription
//! service, and streams the transcript back as newline-delimited JSON.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod app;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod defaults;
pub mod error;
pub mod http;
pub mod model;
pub mod relay;
pub mod service;
pub mod session;
pub mod upload;

// Core traits (upstream client → streaming service)
pub use relay::TranscriptionClient;
pub use service::TranscriptionService;

// Implementations
pub use client::{RelayClient, TranscriptOutcome};
pub use relay::{MockTranscriptionClient, OpenAiClient};
pub use service::{SessionOutcome, StreamService};

// Error handling
pub use error::{RelayError, Result};

// Config
pub use config::Config;

// Wire types
pub use model::{Transcription, TranscriptionRequest};
pub use session::{SessionContext, SessionHandle};
pub use upload::UploadDescriptor;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
