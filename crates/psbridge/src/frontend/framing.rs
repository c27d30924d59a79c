//! Client-facing message framing.
//!
//! Two framings share one stream and are detected per message:
//!
//! ```text
//! {"jsonrpc":"2.0","method":"ping","id":1}\n          JSON per line
//!
//! Content-Length: 40\r\n                               length-prefixed
//! \r\n
//! {"jsonrpc":"2.0","method":"ping","id":1}
//! ```
//!
//! Replies are written back in the framing of the message they answer.

use std::io;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const CONTENT_LENGTH: &[u8] = b"content-length:";

/// Largest accepted `Content-Length` body (8 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    JsonLine,
    ContentLength,
}

/// Classify the first non-empty line of a message.
pub fn detect_framing(line: &[u8]) -> Framing {
    let line = line.trim_ascii_start();
    match line.get(..CONTENT_LENGTH.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(CONTENT_LENGTH) => Framing::ContentLength,
        _ => Framing::JsonLine,
    }
}

fn parse_content_length(line: &[u8], max_body_bytes: usize) -> Result<usize, String> {
    let value = &line.trim_ascii()[CONTENT_LENGTH.len()..];
    let length = std::str::from_utf8(value)
        .ok()
        .map(str::trim)
        .and_then(|v| v.parse::<usize>().ok())
        .ok_or_else(|| {
            format!(
                "invalid Content-Length header: {:?}",
                String::from_utf8_lossy(line.trim_ascii())
            )
        })?;
    if length > max_body_bytes {
        return Err(format!("Content-Length {length} exceeds the {max_body_bytes} byte limit"));
    }
    Ok(length)
}

/// One complete client message body and the framing it arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub framing: Framing,
    pub body: Bytes,
}

impl Frame {
    pub fn new(framing: Framing, body: impl Into<Bytes>) -> Self {
        Self {
            framing,
            body: body.into(),
        }
    }
}

/// Decoded unit of the client stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(Frame),
    /// A header block whose length could not be used; the stream continues.
    InvalidHeader { reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("stream ended inside a header block")]
    TruncatedHeaders,

    #[error("stream ended after {received} of {expected} body bytes")]
    TruncatedBody { expected: usize, received: usize },
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Start,
    Headers {
        length: Result<usize, String>,
    },
    Body {
        length: usize,
    },
}

/// Codec for the dual-framing client stream.
#[derive(Debug)]
pub struct FrameCodec {
    state: State,
    max_body_bytes: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            state: State::Start,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Bodies declared larger than this are rejected as invalid headers.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }
}

fn take_line(src: &mut BytesMut) -> Option<BytesMut> {
    let end = src.iter().position(|b| *b == b'\n')?;
    Some(src.split_to(end + 1))
}

impl Decoder for FrameCodec {
    type Item = Inbound;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match std::mem::take(&mut self.state) {
                State::Start => {
                    let Some(line) = take_line(src) else {
                        return Ok(None);
                    };
                    let line = line.trim_ascii();
                    if line.is_empty() {
                        continue;
                    }
                    match detect_framing(line) {
                        Framing::JsonLine => {
                            let body = Bytes::copy_from_slice(line);
                            return Ok(Some(Inbound::Frame(Frame::new(Framing::JsonLine, body))));
                        }
                        Framing::ContentLength => {
                            self.state = State::Headers {
                                length: parse_content_length(line, self.max_body_bytes),
                            };
                        }
                    }
                }
                State::Headers { length } => {
                    let Some(line) = take_line(src) else {
                        self.state = State::Headers { length };
                        return Ok(None);
                    };
                    if !line.trim_ascii().is_empty() {
                        // Other headers (Content-Type, ...) are ignored.
                        self.state = State::Headers { length };
                        continue;
                    }
                    match length {
                        Ok(length) => self.state = State::Body { length },
                        Err(reason) => return Ok(Some(Inbound::InvalidHeader { reason })),
                    }
                }
                State::Body { length } => {
                    if src.len() < length {
                        self.state = State::Body { length };
                        return Ok(None);
                    }
                    let body = src.split_to(length).freeze();
                    tracing::trace!(body_bytes = length, "Decoded length-prefixed frame");
                    return Ok(Some(Inbound::Frame(Frame::new(Framing::ContentLength, body))));
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        match std::mem::take(&mut self.state) {
            State::Start => {
                // Final line without a terminator.
                let rest = src.split();
                let line = rest.trim_ascii();
                if line.is_empty() {
                    return Ok(None);
                }
                let body = Bytes::copy_from_slice(line);
                Ok(Some(Inbound::Frame(Frame::new(Framing::JsonLine, body))))
            }
            State::Headers { .. } => {
                src.clear();
                Err(FrameError::TruncatedHeaders)
            }
            State::Body { length } => {
                let received = src.len();
                src.clear();
                Err(FrameError::TruncatedBody {
                    expected: length,
                    received,
                })
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match frame.framing {
            Framing::JsonLine => {
                dst.reserve(frame.body.len() + 1);
                dst.put_slice(&frame.body);
                dst.put_u8(b'\n');
            }
            Framing::ContentLength => {
                let header = format!("Content-Length: {}\r\n\r\n", frame.body.len());
                dst.reserve(header.len() + frame.body.len());
                dst.put_slice(header.as_bytes());
                dst.put_slice(&frame.body);
            }
        }
        Ok(())
    }
}
