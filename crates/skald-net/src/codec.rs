//! CR LF line framing for IRC traffic.
//!
//! Splitting the byte stream is delegated to tokio-util's
//! [`AnyDelimiterCodec`]; this layer adds the IRC specifics on top:
//! outbound lines are terminated with CR LF, inbound frames lose their
//! trailing CR, blank lines are swallowed, and bytes that are not valid
//! UTF-8 are reread as Latin-1, which is what legacy networks still
//! speak.

use bytes::BytesMut;
use thiserror::Error;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

/// Frames the connection into IRC lines, as `String`s in both
/// directions.
#[derive(Clone, Debug)]
pub struct IrcCodec {
    frames: AnyDelimiterCodec,
}

impl IrcCodec {
    /// `max_line` caps the inbound line length (excluding the line
    /// ending); a peer that never sends a newline cannot grow the read
    /// buffer past it.
    pub fn new(max_line: usize) -> IrcCodec {
        IrcCodec {
            frames: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\r\n".to_vec(),
                max_line,
            ),
        }
    }
}

impl Decoder for IrcCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        while let Some(frame) = self.frames.decode(buf)? {
            let line = text_from_wire(frame.to_vec());
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        while let Some(frame) = self.frames.decode_eof(buf)? {
            let line = text_from_wire(frame.to_vec());
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for IrcCodec {
    type Error = FrameError;

    fn encode(&mut self, line: T, buf: &mut BytesMut) -> Result<(), FrameError> {
        // The delimiter codec appends the CR LF sequence writer.
        Ok(self.frames.encode(line, buf)?)
    }
}

/// Decode one inbound frame: drop the CR the delimiter split left
/// behind, then UTF-8 with a Latin-1 fallback (every byte maps to the
/// code point of the same value).
fn text_from_wire(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(raw) => raw.into_bytes().iter().copied().map(char::from).collect(),
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("incoming line exceeded the length cap")]
    LineTooLong,
    #[error("transport I/O failed")]
    Io(#[from] std::io::Error),
}

impl From<AnyDelimiterCodecError> for FrameError {
    fn from(e: AnyDelimiterCodecError) -> FrameError {
        match e {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => FrameError::LineTooLong,
            AnyDelimiterCodecError::Io(io) => FrameError::Io(io),
        }
    }
}
