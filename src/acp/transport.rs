//! Framed byte-stream transport.
//!
//! The read half is a plain [`FramedRead`] consumed by exactly one reader
//! loop.  The write half is a [`FrameSink`]: a [`FramedWrite`] behind an
//! async mutex, so every frame is written and flushed as one unit even when
//! many tasks emit concurrently.  Frame order on the wire is the order in
//! which emitters acquire the lock.

use std::pin::Pin;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::acp::codec::FrameCodec;
use crate::{AppError, Result};

/// Type-erased outbound byte stream.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Type-erased inbound byte stream.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Inbound frame stream: one decoded line per item.
pub type FrameStream = FramedRead<BoxedReader, FrameCodec>;

/// Build the inbound frame stream over `reader`.
pub fn frame_stream<R>(reader: R, max_line_bytes: usize) -> FrameStream
where
    R: AsyncRead + Send + 'static,
{
    FramedRead::new(
        Box::pin(reader) as BoxedReader,
        FrameCodec::with_max_length(max_line_bytes),
    )
}

/// Write half of a framed stream, serialized by a single lock.
pub struct FrameSink {
    inner: Mutex<FramedWrite<BoxedWriter, FrameCodec>>,
}

impl FrameSink {
    /// Wrap `writer` in a newline-framing sink.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + 'static,
    {
        Self {
            inner: Mutex::new(FramedWrite::new(
                Box::pin(writer) as BoxedWriter,
                FrameCodec::new(),
            )),
        }
    }

    /// Write one frame (a single JSON line without its newline) and flush.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] when the underlying stream is broken.
    pub async fn send(&self, frame: String) -> Result<()> {
        let mut framed = self.inner.lock().await;
        framed.send(frame).await.map_err(|e| match e {
            AppError::Io(msg) => AppError::Io(format!("write failed: {msg}")),
            other => other,
        })
    }

    /// Flush and shut down the write half, signalling EOF to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the shutdown fails.
    pub async fn close(&self) -> Result<()> {
        let mut framed = self.inner.lock().await;
        SinkExt::<String>::close(&mut *framed).await
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink").finish_non_exhaustive()
    }
}

/// The process's own stdin (inbound) and stdout (outbound).
///
/// Anything else the process prints must go to stderr, or it corrupts
/// framing.
#[must_use]
pub fn stdio() -> (tokio::io::Stdin, tokio::io::Stdout) {
    (tokio::io::stdin(), tokio::io::stdout())
}
