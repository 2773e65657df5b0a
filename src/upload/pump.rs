//! Producer side of the upload pipe.
//!
//! The pump copies the audio source chunk by chunk into a [`PipeWriter`]
//! whose reader is the file part of an outbound multipart form. Nothing is
//! staged: the transport starts sending as soon as the first chunk lands.

use crate::defaults;
use crate::error::RelayError;
use crate::session::SessionContext;
use crate::upload::pipe::PipeWriter;
use crate::upload::remote;
use crate::upload::source::{AudioSource, ByteStream};
use futures_util::StreamExt;
use log::debug;

/// Copies one audio source into the upload pipe.
#[derive(Debug, Clone)]
pub struct UploadPump {
    max_redirects: usize,
}

impl Default for UploadPump {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadPump {
    pub fn new() -> Self {
        Self {
            max_redirects: defaults::MAX_AUDIO_REDIRECTS,
        }
    }

    /// Redirects followed when fetching a URL source.
    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    /// Copy `content` into `writer` until done, failed or cancelled.
    ///
    /// On failure the pipe is closed with the same error that is returned, so
    /// the transport sees a broken body rather than a short one. Returns the
    /// number of audio bytes copied.
    pub async fn run(
        self,
        ctx: SessionContext,
        content: AudioSource,
        writer: PipeWriter,
    ) -> Result<u64, RelayError> {
        let result = tokio::select! {
            biased;
            err = ctx.done() => Err(err),
            res = self.copy(content, &writer) => res,
        };

        match result {
            Ok(written) => {
                writer.close();
                debug!("Finished streaming audio ({written} bytes)");
                Ok(written)
            }
            Err(e) => {
                debug!("Upload pump aborted: {e}");
                writer.close_with_error(e.clone());
                Err(e)
            }
        }
    }

    async fn copy(&self, content: AudioSource, writer: &PipeWriter) -> Result<u64, RelayError> {
        let mut source = self.open(content).await?;
        let mut written = 0u64;
        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(|e| RelayError::UploadSource {
                message: format!("failed to copy audio file data: {e}"),
            })?;
            written += chunk.len() as u64;
            writer.write(chunk).await?;
        }
        Ok(written)
    }

    async fn open(&self, content: AudioSource) -> Result<ByteStream, RelayError> {
        match content {
            AudioSource::Stream(stream) => Ok(stream),
            AudioSource::Url(url) => remote::fetch(&url, self.max_redirects).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::pipe::pipe;
    use crate::upload::source::UploadDescriptor;
    use bytes::Bytes;
    use futures_util::stream;
    use std::time::Duration;

    async fn collect_body(content: AudioSource) -> (Result<u64, RelayError>, Vec<u8>, bool) {
        let (ctx, _handle) = SessionContext::with_timeout(Duration::from_secs(5));
        let (writer, mut reader) = pipe(2);
        let task = tokio::spawn(UploadPump::new().run(ctx, content, writer));

        let mut body = Vec::new();
        let mut broken = false;
        while let Some(chunk) = reader.next().await {
            match chunk {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(_) => broken = true,
            }
        }
        (task.await.unwrap(), body, broken)
    }

    #[tokio::test]
    async fn test_copies_source_in_order() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"RIFF")),
            Ok(Bytes::from_static(b"data")),
            Ok(Bytes::from_static(b"tail")),
        ])
        .boxed();

        let (result, body, broken) = collect_body(AudioSource::Stream(source)).await;
        assert_eq!(result.unwrap(), 12);
        assert!(!broken);
        assert_eq!(body, b"RIFFdatatail");
    }

    #[tokio::test]
    async fn test_source_error_breaks_pipe() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"first")),
            Err(std::io::Error::other("read failed")),
        ])
        .boxed();

        let (result, body, broken) = collect_body(AudioSource::Stream(source)).await;
        assert!(matches!(result, Err(RelayError::UploadSource { .. })));
        assert!(broken, "reader must observe the failure");
        assert!(body.is_empty() || body == b"first", "nothing after the failure");
    }

    #[tokio::test]
    async fn test_cancellation_stops_stalled_source() {
        let (ctx, handle) = SessionContext::with_timeout(Duration::from_secs(5));
        let (writer, reader) = pipe(2);
        let fault = reader.fault();
        let stalled = stream::pending::<std::io::Result<Bytes>>().boxed();
        let task = tokio::spawn(UploadPump::new().run(ctx, AudioSource::Stream(stalled), writer));

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("pump must stop after cancellation")
            .unwrap();
        assert_eq!(result, Err(RelayError::Cancelled));
        assert_eq!(fault.take(), Some(RelayError::Cancelled));
    }

    #[tokio::test]
    async fn test_reader_gone_aborts_pump() {
        let (ctx, _handle) = SessionContext::with_timeout(Duration::from_secs(5));
        let (writer, reader) = pipe(1);
        drop(reader);
        let upload = UploadDescriptor::from_bytes(&b"abc"[..], "a.wav");
        let result = UploadPump::new().run(ctx, upload.content, writer).await;
        assert!(matches!(result, Err(RelayError::UploadAborted { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_url_breaks_pipe() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = AudioSource::Url(format!("http://{addr}/talk.wav"));
        let (result, body, broken) = collect_body(source).await;
        assert!(matches!(result, Err(RelayError::UploadSource { .. })));
        assert!(broken);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_url_source_respects_redirect_limit() {
        let app = axum::Router::new()
            .route("/talk.wav", axum::routing::get(|| async { "RIFFdata" }))
            .route(
                "/moved",
                axum::routing::get(|| async { axum::response::Redirect::temporary("/talk.wav") }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        let moved = format!("http://{addr}/moved");

        let (result, body, _) = collect_body(AudioSource::Url(moved.clone())).await;
        assert_eq!(result.unwrap(), 8);
        assert_eq!(body, b"RIFFdata");

        let (ctx, _handle) = SessionContext::with_timeout(Duration::from_secs(5));
        let (writer, _reader) = pipe(2);
        let result = UploadPump::new()
            .with_max_redirects(0)
            .run(ctx, AudioSource::Url(moved), writer)
            .await;
        assert!(matches!(result, Err(RelayError::UploadSource { .. })));
    }
}
