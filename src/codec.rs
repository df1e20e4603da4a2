//! Newline framing for the chat wire protocol.
//!
//! Every logical message is one UTF-8 line terminated by `\n`. There is no length prefix, so the
//! decoder caps how much it buffers while waiting for a newline.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Default cap on a single line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Splits a byte stream into lines and writes lines back out.
///
/// Decoded lines have their trailing whitespace (including a `\r` from CRLF peers) removed.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_length: usize,
    /// Where the newline search resumes, so a slow peer does not make us rescan the buffer.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_length: usize) -> LineCodec {
        LineCodec {
            max_length,
            next_index: 0,
        }
    }

    /// A codec that buffers lines of any length, for reading from a peer that is trusted to bound
    /// them itself.
    pub fn unbounded() -> LineCodec {
        LineCodec::new(usize::MAX)
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn take_line(&mut self, buf: &mut BytesMut, len: usize, consume: usize) -> Result<String, CodecError> {
        let frame = buf.split_to(consume);
        self.next_index = 0;
        let line = std::str::from_utf8(&frame[..len]).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(line.trim_end().to_string())
    }
}

impl Default for LineCodec {
    fn default() -> LineCodec {
        LineCodec::new(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let newline = buf[self.next_index..].iter().position(|b| *b == b'\n');
        match newline {
            Some(offset) => {
                let len = self.next_index + offset;
                if len > self.max_length {
                    return Err(CodecError::LineTooLong { max: self.max_length });
                }
                self.take_line(buf, len, len + 1).map(Some)
            }
            None if buf.len() > self.max_length => Err(CodecError::LineTooLong { max: self.max_length }),
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CodecError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        // The peer hung up mid-line; hand over what it did send.
        let len = buf.len();
        self.take_line(buf, len, len).map(Some)
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), CodecError> {
        let line = item.as_ref();
        dst.reserve(line.len() + 1);
        dst.put(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
