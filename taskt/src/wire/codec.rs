//! Newline-delimited JSON codec.
//!
//! Uses AnyDelimiterCodec for framing on `\n` + serde_json for serialization.
//! Lines are parsed as raw bytes, so a line that is not valid JSON (or not
//! valid UTF-8) is a per-frame error (`Ok(Err(_))`), not a stream error: the
//! connection keeps reading. Only I/O failures and over-long lines end the
//! stream.

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder, Encoder};

/// Default cap on a single request line.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

pub struct JsonLinesCodec<T> {
    inner: AnyDelimiterCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonLinesCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonLinesCodec<T> {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(
                b"\n".to_vec(),
                b"\n".to_vec(),
                max_length,
            ),
            _phantom: PhantomData,
        }
    }
}

fn into_io_error(err: AnyDelimiterCodecError) -> io::Error {
    match err {
        AnyDelimiterCodecError::MaxChunkLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line exceeds maximum length")
        }
        AnyDelimiterCodecError::Io(e) => e,
    }
}

impl<T: DeserializeOwned> JsonLinesCodec<T> {
    fn parse(line: Option<Bytes>) -> Option<Result<T, serde_json::Error>> {
        line.map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(&line[..]);
            serde_json::from_slice(line)
        })
    }
}

impl<T: DeserializeOwned> Decoder for JsonLinesCodec<T> {
    type Item = Result<T, serde_json::Error>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode(src).map_err(into_io_error)?;
        Ok(Self::parse(line))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode_eof(src).map_err(into_io_error)?;
        Ok(Self::parse(line))
    }
}

impl<T: Serialize> Encoder<T> for JsonLinesCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_string(&item)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(json_size_bytes = json.len(), "Encoding line");
        self.inner.encode(json, dst).map_err(into_io_error)
    }
}
