//! Bounded in-process byte pipe between the multipart pump and the HTTP
//! transport.
//!
//! The writer side awaits free capacity, so a slow upstream connection
//! throttles the pump instead of letting the body pile up in memory. Closing
//! the writer with an error makes the reader yield that error instead of a
//! clean end of stream, and keeps the aborting [`RelayError`] for whoever
//! holds a [`PipeFault`].

use crate::error::RelayError;
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Create a pipe holding at most `capacity` chunks in flight.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let fault = PipeFault::default();
    (
        PipeWriter {
            tx,
            fault: fault.clone(),
        },
        PipeReader {
            rx,
            fault,
            finished: false,
        },
    )
}

/// Shared slot recording why the writer closed the pipe early.
#[derive(Debug, Clone, Default)]
pub struct PipeFault {
    slot: Arc<Mutex<Option<RelayError>>>,
}

impl PipeFault {
    fn set(&self, error: RelayError) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.get_or_insert(error);
        }
    }

    fn message(&self) -> Option<String> {
        self.slot
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(ToString::to_string))
    }

    /// Take the recorded error, if the writer closed with one.
    pub fn take(&self) -> Option<RelayError> {
        self.slot.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Transmit side, owned by the pump.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
    fault: PipeFault,
}

impl PipeWriter {
    /// Write one chunk, waiting for capacity.
    ///
    /// Fails with [`RelayError::UploadAborted`] once the reader is gone.
    pub async fn write(&self, chunk: Bytes) -> Result<(), RelayError> {
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(chunk)
            .await
            .map_err(|_| RelayError::UploadAborted {
                message: "request body is no longer being read".to_string(),
            })
    }

    /// Finish the body normally.
    pub fn close(self) {
        drop(self);
    }

    /// Abort the body. The reader reports `error` instead of ending cleanly;
    /// chunks still buffered are discarded.
    pub fn close_with_error(self, error: RelayError) {
        self.fault.set(error);
    }
}

/// Receive side, handed to the HTTP client as the request body.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    fault: PipeFault,
    finished: bool,
}

impl PipeReader {
    /// Handle for reading the abort reason after the reader was moved away.
    pub fn fault(&self) -> PipeFault {
        self.fault.clone()
    }

    fn fail(&mut self, message: String) -> Poll<Option<io::Result<Bytes>>> {
        self.finished = true;
        self.rx.close();
        Poll::Ready(Some(Err(io::Error::other(message))))
    }
}

impl Stream for PipeReader {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if let Some(message) = this.fault.message() {
            return this.fail(message);
        }
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            // Writer dropped: either a clean close or close_with_error.
            Poll::Ready(None) => match this.fault.message() {
                Some(message) => this.fail(message),
                None => {
                    this.finished = true;
                    Poll::Ready(None)
                }
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_chunks_arrive_in_order_then_end() {
        let (writer, mut reader) = pipe(4);
        writer.write(Bytes::from_static(b"ab")).await.unwrap();
        writer.write(Bytes::from_static(b"cd")).await.unwrap();
        writer.close();

        assert_eq!(reader.next().await.unwrap().unwrap(), "ab");
        assert_eq!(reader.next().await.unwrap().unwrap(), "cd");
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_with_error_surfaces_error_not_eof() {
        let (writer, mut reader) = pipe(4);
        let fault = reader.fault();
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        writer.close_with_error(RelayError::UploadSource {
            message: "disk gone".to_string(),
        });

        let item = reader.next().await.unwrap();
        let err = item.unwrap_err();
        assert!(err.to_string().contains("disk gone"));
        assert!(reader.next().await.is_none(), "stream ends after the error");
        assert_eq!(
            fault.take(),
            Some(RelayError::UploadSource {
                message: "disk gone".to_string()
            })
        );
        assert_eq!(fault.take(), None);
    }

    #[tokio::test]
    async fn test_write_after_reader_dropped_fails() {
        let (writer, reader) = pipe(1);
        drop(reader);
        let result = writer.write(Bytes::from_static(b"x")).await;
        assert!(matches!(result, Err(RelayError::UploadAborted { .. })));
    }

    #[tokio::test]
    async fn test_writer_blocks_when_full() {
        let (writer, mut reader) = pipe(1);
        writer.write(Bytes::from_static(b"1")).await.unwrap();

        let blocked = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            writer.write(Bytes::from_static(b"2")),
        )
        .await;
        assert!(blocked.is_err(), "second write should wait for the reader");

        assert_eq!(reader.next().await.unwrap().unwrap(), "1");
        writer.write(Bytes::from_static(b"3")).await.unwrap();
        assert_eq!(reader.next().await.unwrap().unwrap(), "3");
    }

    #[tokio::test]
    async fn test_empty_chunks_are_skipped() {
        let (writer, mut reader) = pipe(1);
        writer.write(Bytes::new()).await.unwrap();
        writer.close();
        assert!(reader.next().await.is_none());
    }
}
