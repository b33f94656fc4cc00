//! Line framing for the stdio transport

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

/// One decoded input line
#[derive(Debug, PartialEq, Eq)]
pub enum InputLine {
    Line(String),
    /// A line longer than the limit; its bytes are skipped up to the next newline
    Oversized,
}

/// Newline-delimited decoder that survives oversized lines
///
/// `FramedRead` stops yielding items after its decoder returns an error, so
/// the length overflow is reported as an item instead.
#[derive(Debug)]
pub struct RequestCodec {
    inner: LinesCodec,
}

impl RequestCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
        }
    }
}

impl Decoder for RequestCodec {
    type Item = InputLine;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        lift(self.inner.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        lift(self.inner.decode_eof(src))
    }
}

fn lift(decoded: Result<Option<String>, LinesCodecError>) -> Result<Option<InputLine>, LinesCodecError> {
    match decoded {
        Ok(line) => Ok(line.map(InputLine::Line)),
        Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(InputLine::Oversized)),
        Err(e) => Err(e),
    }
}
