//! Audio sources accepted by the relay.

use crate::defaults;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

/// A chunked audio payload of unknown length.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Where the audio bytes come from.
pub enum AudioSource {
    /// Bytes streamed from the caller's connection (direct upload).
    Stream(ByteStream),
    /// Remote audio fetched by the pump while it uploads.
    Url(String),
}

impl std::fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioSource::Stream(_) => f.write_str("Stream(..)"),
            AudioSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// Audio to transcribe plus the filename declared to the upstream service.
///
/// The filename is informational only and never touches the filesystem.
#[derive(Debug)]
pub struct UploadDescriptor {
    pub content: AudioSource,
    pub filename: String,
}

impl UploadDescriptor {
    pub fn from_stream(content: ByteStream, filename: impl Into<String>) -> Self {
        Self {
            content: AudioSource::Stream(content),
            filename: filename.into(),
        }
    }

    /// Remote audio; the filename is the URL's last path segment.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let filename = filename_from_url(&url);
        Self {
            content: AudioSource::Url(url),
            filename,
        }
    }

    /// In-memory audio, handy for tests and small payloads.
    pub fn from_bytes(data: impl Into<Bytes>, filename: impl Into<String>) -> Self {
        let data = data.into();
        Self::from_stream(stream::once(async move { Ok(data) }).boxed(), filename)
    }
}

fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| defaults::FALLBACK_FILENAME.to_string())
}

/// Stream an async reader in fixed-size chunks.
pub fn reader_stream<R>(reader: R) -> ByteStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = BytesMut::with_capacity(defaults::READ_CHUNK_BYTES);
        match reader.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(reader))),
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Adapt a chunk channel into a [`ByteStream`]. Ends when every sender is
/// dropped; dropping the stream makes further sends fail.
pub fn channel_stream(rx: mpsc::Receiver<io::Result<Bytes>>) -> ByteStream {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url_uses_last_segment() {
        let upload = UploadDescriptor::from_url("https://cdn.example.com/audio/talk.mp3");
        assert_eq!(upload.filename, "talk.mp3");
    }

    #[test]
    fn test_filename_from_url_falls_back() {
        assert_eq!(filename_from_url("https://example.com/"), "audio");
        assert_eq!(filename_from_url("not a url"), "audio");
    }

    #[tokio::test]
    async fn test_reader_stream_yields_all_bytes() {
        let data = vec![7u8; defaults::READ_CHUNK_BYTES + 10];
        let chunks: Vec<Bytes> = reader_stream(std::io::Cursor::new(data.clone()))
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert!(chunks.len() >= 2);
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_channel_stream_forwards_errors() {
        let (tx, rx) = mpsc::channel(2);
        tx.send(Ok(Bytes::from_static(b"a"))).await.unwrap();
        tx.send(Err(io::Error::other("boom"))).await.unwrap();
        drop(tx);

        let items: Vec<io::Result<Bytes>> = channel_stream(rx).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }
}
