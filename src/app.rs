//! Relay application entry points.
//!
//! Wires config → upstream client → streaming service → HTTP server, and the
//! client side used by `voxrelay transcribe`.

use crate::client::{RelayClient, TranscriptOutcome};
use crate::config::Config;
use crate::error::Result;
use crate::http::{AppState, RelayServer, shutdown_signal};
use crate::relay::OpenAiClient;
use crate::service::StreamService;
use log::{debug, info};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run the relay until SIGINT/SIGTERM.
pub async fn run_server(config: Config) -> Result<()> {
    config.validate()?;
    let api_key = config.api_key()?;
    let request_timeout = config.request_timeout()?;

    let client = OpenAiClient::with_endpoint(api_key, &config.upstream.url, &config.upstream.model);
    info!(
        "Relaying to {} (model {})",
        client.url(),
        client.model()
    );
    debug!("Request timeout: {}", humantime::format_duration(request_timeout));

    let service = StreamService::new(Arc::new(client));
    let state = AppState::new(Arc::new(service)).with_request_timeout(request_timeout);
    let server = RelayServer::bind(&config.bind_addr(), state).await?;
    server.run(shutdown_signal()).await
}

/// Upload `file` to the relay at `server`, handing each fragment to
/// `on_fragment` as it arrives.
pub async fn run_transcribe<F>(
    file: &Path,
    server: &str,
    timeout: Option<Duration>,
    on_fragment: F,
) -> Result<TranscriptOutcome>
where
    F: FnMut(&str),
{
    let mut client = RelayClient::new(server);
    if let Some(timeout) = timeout {
        client = client.with_timeout(timeout);
    }
    debug!("Transcribing {} via {}", file.display(), client.endpoint());
    client.transcribe_file(file, on_fragment).await
}
