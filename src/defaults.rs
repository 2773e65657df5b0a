//! Default configuration constants for voxrelay.
//!
//! Shared by the config layer, the relay and the tests so the fixed parts of
//! the upstream contract live in one place.

use std::time::Duration;

/// Default listening address.
pub const HOST: &str = "0.0.0.0";

/// Default listening port.
pub const PORT: u16 = 8080;

/// Per-request deadline, attached to every session when it is accepted.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Default request timeout as written in config files.
pub const REQUEST_TIMEOUT_STR: &str = "2m";

/// Upstream transcription endpoint.
pub const UPSTREAM_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Speech model requested from the upstream service.
pub const MODEL: &str = "gpt-4o-mini-transcribe";

/// Environment variable holding the upstream credential.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Route served by the relay.
pub const TRANSCRIBE_ROUTE: &str = "/api/transcribe";

/// Multipart field carrying the audio payload, both inbound and outbound.
pub const FILE_FIELD: &str = "file";

/// Filename declared when the caller did not provide a usable one.
pub const FALLBACK_FILENAME: &str = "audio";

/// Redirects followed when fetching audio for the URL variant.
pub const MAX_AUDIO_REDIRECTS: usize = 5;

/// Chunks buffered between the pump and the HTTP transport.
///
/// Each slot holds one source chunk, so memory stays bounded regardless of
/// upload size.
pub const PIPE_CAPACITY: usize = 8;

/// Chunks buffered between the inbound multipart body and the pump.
pub const UPLOAD_CHANNEL_CAPACITY: usize = 4;

/// Fragments buffered between the upstream relay and the multiplexer.
pub const FRAGMENT_CHANNEL_CAPACITY: usize = 16;

/// Fragments buffered between the multiplexer and the HTTP response.
///
/// One slot: the response never runs more than one fragment ahead.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1;

/// Longest upstream line accepted before the stream is treated as broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Longest diagnostic body kept from a non-success upstream response.
pub const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Read size used when streaming a local file.
pub const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Relay address used by the `transcribe` client command.
pub const CLIENT_SERVER_URL: &str = "http://127.0.0.1:8080";

/// Time in-flight sessions get to finish once shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
