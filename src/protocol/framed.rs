//! Async frame I/O
//!
//! [`FramedStream`] owns the client side of a session: it keeps partially
//! received frames in its own buffer so a read can be abandoned (by a
//! `select!` on shutdown or a probe tick) without losing bytes.
//! [`read_frame`] is the simpler exact-read used on pooled backend
//! connections, where an abandoned read means the connection is discarded.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::MalformedMessage;
use super::header::MessageHeader;
use super::parser::{checked_frame_size, frame_len};
use crate::constants::buffer::FRAME_INITIAL;
use crate::constants::wire::HEADER_LEN;

/// Failure while reading a frame off a stream
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte stream can no longer be split into frames
    #[error("unframeable input: {0}")]
    Malformed(#[from] MalformedMessage),
}

/// Buffered, cancel-safe frame reader plus writer
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    buf: BytesMut,
    max_message_size: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, max_message_size: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(FRAME_INITIAL),
            max_message_size,
        }
    }

    /// Read the next complete frame
    ///
    /// Returns `Ok(None)` on a clean close between frames. A close in the
    /// middle of a frame is reported as `UnexpectedEof`.
    ///
    /// Cancel-safe: bytes already received stay buffered for the next call.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>, FrameError> {
        loop {
            if let Some(len) = frame_len(&self.buf, self.max_message_size)? {
                return Ok(Some(self.buf.split_to(len).freeze()));
            }
            if let Some(raw) = MessageHeader::peek(&self.buf) {
                self.buf.reserve((raw.size as usize).saturating_sub(self.buf.len()));
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("peer closed with {} bytes of a partial frame", self.buf.len()),
                )
                .into());
            }
        }
    }

    pub async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(frame).await?;
        self.stream.flush().await
    }
}

/// Read exactly one frame from `reader`
///
/// Not cancel-safe; callers drop the connection if this is interrupted.
pub async fn read_frame<R>(reader: &mut R, max_message_size: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).await?;
    let declared = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let len = checked_frame_size(declared, max_message_size)?;

    let mut frame = BytesMut::with_capacity(len);
    frame.extend_from_slice(&header);
    frame.resize(len, 0);
    reader.read_exact(&mut frame[HEADER_LEN..]).await?;
    Ok(frame.freeze())
}
