//! NDJSON frame codec for ACP streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a configurable maximum line
//! length so that an unterminated or oversized message from a misbehaving
//! peer cannot exhaust memory.
//!
//! # Usage
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).  One frame is one
//! `\n`-terminated UTF-8 line holding exactly one JSON value.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use tracing::warn;

use crate::{AppError, Result};

/// Default maximum frame length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited frame codec.
///
/// # Decoder
///
/// Lines longer than the configured limit are discarded up to the next
/// newline and logged at `WARN`; decoding continues with the following
/// frame.  Lines that are not valid UTF-8 are dropped the same way.  An
/// error from a decoder terminates a `FramedRead`, so a bad frame must never
/// surface as one.  Other I/O errors are mapped to [`AppError::Io`].
///
/// # Encoder
///
/// Outbound frames are written as `item\n`.  The size limit is a
/// decoder-side concern and is not enforced when encoding.
#[derive(Debug)]
pub struct FrameCodec {
    inner: LinesCodec,
    max_length: usize,
    discarded: u64,
}

impl FrameCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec rejecting inbound lines longer than `max_length` bytes.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
            discarded: 0,
        }
    }

    /// Number of oversized or non-UTF-8 frames dropped so far.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn on_error(&mut self, e: LinesCodecError) -> Option<AppError> {
        match e {
            LinesCodecError::MaxLineLengthExceeded => {
                self.discarded += 1;
                warn!(
                    max_length = self.max_length,
                    "acp codec: line too long, discarding frame"
                );
                None
            }
            // LinesCodec has already consumed the offending line.
            LinesCodecError::Io(io_err) if io_err.kind() == io::ErrorKind::InvalidData => {
                self.discarded += 1;
                warn!(error = %io_err, "acp codec: frame is not valid utf-8, discarding");
                None
            }
            LinesCodecError::Io(io_err) => Some(AppError::Io(io_err.to_string())),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next complete line from `src`, or `Ok(None)` while buffering.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Ok(item) => return Ok(item),
                Err(e) => {
                    if let Some(err) = self.on_error(e) {
                        return Err(err);
                    }
                }
            }
        }
    }

    /// Decode a final unterminated line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Ok(item) => return Ok(item),
                Err(e) => {
                    if let Some(err) = self.on_error(e) {
                        return Err(err);
                    }
                }
            }
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(|e| match e {
            LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
            LinesCodecError::MaxLineLengthExceeded => {
                AppError::Framing("line too long on encode".into())
            }
        })
    }
}
