//! HTTP surface of the relay.

pub mod handler;
pub mod server;

use crate::defaults;
use crate::service::TranscriptionService;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use std::sync::Arc;
use std::time::Duration;

pub use server::{RelayServer, shutdown_signal};

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn TranscriptionService>,
    /// Deadline attached to each session when it is accepted.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(service: Arc<dyn TranscriptionService>) -> Self {
        Self {
            service,
            request_timeout: defaults::REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Build the relay's router. Uploads are streamed, so no body limit applies.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(defaults::TRANSCRIBE_ROUTE, post(handler::transcribe))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}
