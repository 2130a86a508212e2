//! Length-prefixed framing.
//!
//! ```text
//! +-- header (header_len bytes) ------------+-- payload ---------+
//! | ASCII decimal payload length,           |                    |
//! | left aligned, padded with spaces        |  [u8; length]      |
//! +-----------------------------------------+--------------------+
//! ```
//!
//! With the default 10-byte header a 5-byte payload is sent as
//! `b"5         "` followed by the five payload bytes. Receivers must read
//! exactly the declared number of bytes before handing the payload on.

use crate::error::{Result, WireError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

pub const DEFAULT_HEADER_LEN: usize = 10;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame codec for [`tokio_util::codec::Framed`]; holds no per-connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_len: usize,
    max_frame_len: usize,
}

impl FrameCodec {
    pub fn new(header_len: usize, max_frame_len: usize) -> Self {
        Self {
            header_len,
            max_frame_len,
        }
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Parse a header into the payload length it announces.
    pub fn parse_header(&self, header: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(header)
            .map_err(|_| WireError::BadHeader(String::from_utf8_lossy(header).into_owned()))?;
        let len: usize = text
            .trim()
            .parse()
            .map_err(|_| WireError::BadHeader(text.to_string()))?;
        if len > self.max_frame_len {
            return Err(WireError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        Ok(len)
    }

    fn too_large(&self, len: usize) -> WireError {
        WireError::FrameTooLarge {
            len,
            max: self.max_frame_len,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = WireError;

    /// Split one complete frame off the front of `src`.
    ///
    /// Returns `Ok(None)` until the header and the whole payload are buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < self.header_len {
            return Ok(None);
        }
        let len = self.parse_header(&src[..self.header_len])?;
        let total = self.header_len + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(self.header_len);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_frame_len {
            return Err(self.too_large(payload.len()));
        }
        let header = format!("{:<width$}", payload.len(), width = self.header_len);
        // A length with more digits than the header is wide cannot be framed.
        if header.len() != self.header_len {
            return Err(self.too_large(payload.len()));
        }

        dst.reserve(self.header_len + payload.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_LEN, DEFAULT_MAX_FRAME_LEN)
    }
}
