//! # Frame Codec
//!
//! Length-prefixed framing over any byte stream.
//!
//! ## Invariants
//! - **Partial Reads**: Nothing is consumed from the buffer until a whole frame is present.
//! - **Atomic Writes**: An encoded frame is produced in one buffer or not at all.
//! - **Bad Payloads**: A frame that does not deserialize is dropped; the stream continues.
//! - **Bounded Frames**: A length prefix above `max_frame_len` is a fatal protocol error.

use std::sync::Arc;

use bytes::Buf;
use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tracing::warn;

use crate::error::Error;
use crate::error::Result;
use crate::message::Message;
use crate::serializer::Serializer;

/// Size of the big-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Frames larger than this are refused unless configured otherwise.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// Encodes messages into frames and cuts frames back out of a byte buffer.
#[derive(Clone)]
pub struct FrameCodec {
    serializer: Arc<dyn Serializer>,
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(serializer: Arc<dyn Serializer>, max_frame_len: usize) -> Self {
        Self {
            serializer,
            max_frame_len,
        }
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Serializes `message` and prepends its length.
    pub fn encode(&self, message: &Message) -> Result<Bytes> {
        let payload = self.serializer.serialize(message)?;
        if payload.len() > self.max_frame_len || payload.len() > u32::MAX as usize {
            return Err(Error::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }

        let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
        frame.put_u32(payload.len() as u32);
        frame.put_slice(&payload);
        Ok(frame.freeze())
    }

    /// Splits one complete payload off the front of `buf`.
    ///
    /// Returns `Ok(None)` while the prefix or payload is still incomplete.
    pub fn next_frame(&self, buf: &mut BytesMut) -> Result<Option<Bytes>> {
        if buf.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > self.max_frame_len {
            return Err(Error::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if buf.len() < LENGTH_PREFIX_LEN + len {
            buf.reserve(LENGTH_PREFIX_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(LENGTH_PREFIX_LEN);
        Ok(Some(buf.split_to(len).freeze()))
    }

    /// Decodes the next message in `buf`, skipping frames whose payload is garbage.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Message>> {
        while let Some(payload) = self.next_frame(buf)? {
            match self.serializer.deserialize(&payload) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(
                        serializer = self.serializer.name(),
                        len = payload.len(),
                        error = %e,
                        "dropping undecodable frame"
                    );
                }
            }
        }
        Ok(None)
    }
}

/// Pulls whole messages off an async reader.
pub struct FrameReader<R> {
    inner: R,
    buf: BytesMut,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
            codec,
        }
    }

    /// Reads until one message is decoded.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames, and an I/O error if
    /// the stream ends inside a frame.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(message));
            }

            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(Error::Io(format!(
                    "stream closed with {} bytes of an unfinished frame",
                    self.buf.len()
                )));
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}
