use bytes::{Buf, BytesMut};

use crate::error::{Result, TorrentError};
use crate::peer::message::Message;

const LENGTH_PREFIX: usize = 4;

/// Accumulates raw socket bytes and cuts them into length-prefixed frames.
///
/// A frame is only consumed once all of its `4 + length` bytes are
/// buffered, so the output does not depend on how the input was chunked.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_frame_length: u32,
}

impl FrameBuffer {
    pub fn new(max_frame_length: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_length,
        }
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Spare room for a socket read.
    pub fn read_target(&mut self, additional: usize) -> &mut BytesMut {
        self.buf.reserve(additional);
        &mut self.buf
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame, if one is fully buffered.
    ///
    /// # Errors
    /// `MalformedFrame` when the declared length exceeds the maximum; the
    /// buffer is left untouched since no later frame can be trusted.
    pub fn next_frame(&mut self) -> Result<Option<Message>> {
        if self.buf.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let length = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if length > self.max_frame_length {
            return Err(TorrentError::MalformedFrame { length });
        }
        if self.buf.len() < LENGTH_PREFIX + length as usize {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX);
        let body = self.buf.split_to(length as usize).freeze();
        Message::decode(body).map(Some)
    }
}
