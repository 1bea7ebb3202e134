//! Frame Codec
//!
//! Gateway frames are a 4-byte big-endian payload length followed by the
//! payload: text fields, each terminated by a NUL byte.
//!
//! ```text
//! ┌──────────────┬──────────┬────┬──────────┬────┬─────┐
//! │ len (u32 BE) │ field 0  │ \0 │ field 1  │ \0 │ ... │
//! └──────────────┴──────────┴────┴──────────┴────┴─────┘
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use crate::application::ports::TransportError;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Framing errors.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload length above the limit.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    TooLarge {
        /// Announced or computed payload length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// An outbound field contains the terminator byte.
    #[error("field {index} contains a NUL byte")]
    EmbeddedNul {
        /// Position of the offending field.
        index: usize,
    },
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => Self::Io(e),
            other => Self::Frame(other.to_string()),
        }
    }
}

/// Length-prefixed, NUL-separated field codec.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Codec with the default size limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_len: MAX_FRAME_LEN,
        }
    }

    /// Codec with a custom size limit.
    #[must_use]
    pub const fn with_max_len(max_len: usize) -> Self {
        Self { max_len }
    }
}

/// Split a payload into its fields, dropping the final terminator.
#[must_use]
pub fn split_fields(payload: &[u8]) -> Vec<String> {
    if payload.is_empty() {
        return Vec::new();
    }
    let mut fields: Vec<String> = payload
        .split(|b| *b == 0)
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    if payload.last() == Some(&0) {
        fields.pop();
    }
    fields
}

impl Decoder for FrameCodec {
    type Item = Vec<String>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }

        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }

        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LEN_PREFIX);
        let payload = src.split_to(len);
        Ok(Some(split_fields(&payload)))
    }
}

impl Encoder<Vec<String>> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, fields: Vec<String>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if let Some(index) = fields.iter().position(|f| f.as_bytes().contains(&0)) {
            return Err(FrameError::EmbeddedNul { index });
        }

        let len: usize = fields.iter().map(|f| f.len() + 1).sum();
        if len > self.max_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_len,
            });
        }
        let prefix = u32::try_from(len).map_err(|_| FrameError::TooLarge {
            len,
            max: self.max_len,
        })?;

        dst.reserve(LEN_PREFIX + len);
        dst.put_u32(prefix);
        for field in &fields {
            dst.put_slice(field.as_bytes());
            dst.put_u8(0);
        }
        Ok(())
    }
}
