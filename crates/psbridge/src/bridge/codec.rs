//! Framed codec for listener communication.
//!
//! One JSON document per line, terminated by `\n` (a preceding `\r` is
//! tolerated). Works over any AsyncRead/AsyncWrite.
//!
//! At end of stream, unterminated trailing bytes are still accepted when they
//! form a complete JSON document; anything else is reported as truncated.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[source] serde_json::Error),

    #[error("connection closed after {received} bytes without a complete line")]
    Truncated { received: usize },
}

/// Codec that frames messages with a trailing newline and serializes with JSON.
pub struct JsonLineCodec<T> {
    /// Bytes already scanned for a newline, so partial reads are not rescanned.
    next_index: usize,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLineCodec<T> {
    pub fn new() -> Self {
        Self {
            next_index: 0,
            _phantom: PhantomData,
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

impl<T: DeserializeOwned> Decoder for JsonLineCodec<T> {
    type Item = T;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
            self.next_index = src.len();
            return Ok(None);
        };

        let line = src.split_to(self.next_index + offset + 1);
        self.next_index = 0;

        let body = strip_line_ending(&line);
        tracing::trace!(line_bytes = body.len(), "Decoding line");
        serde_json::from_slice(body)
            .map(Some)
            .map_err(CodecError::Json)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.decode(src)? {
            return Ok(Some(item));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let rest = src.split();
        self.next_index = 0;
        match serde_json::from_slice(strip_line_ending(&rest)) {
            Ok(item) => Ok(Some(item)),
            Err(_) => Err(CodecError::Truncated {
                received: rest.len(),
            }),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonLineCodec<T> {
    type Error = CodecError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(CodecError::Json)?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding line");
        dst.reserve(json.len() + 1);
        dst.put_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
