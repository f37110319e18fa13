//! Length-prefixed framing for the inner connection.
//!
//! ## Wire format
//!
//! ```text
//! +----------------------+-------------------------------+
//! | length (u32, BE)     | payload (length bytes, UTF-8) |
//! +----------------------+-------------------------------+
//! ```
//!
//! The codec is stateless: [`FrameCodec::try_decode`] only consumes bytes
//! from the caller's receive buffer once a whole frame is present, so it
//! can be re-invoked every time more data arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::InnerError;

/// Size of the binary length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound on a single frame's payload (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ── Frame ────────────────────────────────────────────────────────

/// One discrete message extracted from (or destined for) the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Declared length of the frame, as written in the prefix.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ── FrameCodec ───────────────────────────────────────────────────

/// Encoder/decoder for length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Prepend the length prefix to `payload`, producing the wire bytes.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, InnerError> {
        let mut dst = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        self.encode_into(payload, &mut dst)?;
        Ok(dst.freeze())
    }

    fn encode_into(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), InnerError> {
        self.check_size(payload.len())?;
        dst.reserve(LENGTH_PREFIX_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.extend_from_slice(payload);
        Ok(())
    }

    /// Try to extract one frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when fewer bytes than required are buffered;
    /// nothing is consumed in that case. An oversized length prefix is an
    /// error and the caller must drop the connection.
    pub fn try_decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, InnerError> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX_SIZE]);
        let length = u32::from_be_bytes(prefix) as usize;
        self.check_size(length)?;

        if src.len() < LENGTH_PREFIX_SIZE + length {
            src.reserve(LENGTH_PREFIX_SIZE + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length).freeze();
        Ok(Some(Frame { payload }))
    }

    fn check_size(&self, size: usize) -> Result<(), InnerError> {
        if size > self.max_frame_size || size > u32::MAX as usize {
            return Err(InnerError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = InnerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        self.try_decode(src)
    }
}

impl tokio_util::codec::Encoder<Bytes> for FrameCodec {
    type Error = InnerError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(&item, dst)
    }
}

impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = InnerError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.encode_into(item.payload(), dst)
    }
}

// ── Tests ────────────────────────────────────────────────────────
