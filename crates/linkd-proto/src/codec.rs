//! Line framing for peer-link records.

use crate::error::ProtocolError;
use crate::record::Record;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Frames one [`Record`] per `\n`-terminated line.
///
/// Blank lines are skipped. A trailing `\r` is tolerated on input and never
/// written on output.
#[derive(Debug)]
pub struct RecordCodec {
    lines: LinesCodec,
    max_length: usize,
}

impl RecordCodec {
    /// Default line limit for burst records; `SJOIN` of large channels
    /// needs far more than the client protocol's 512 bytes.
    pub const DEFAULT_MAX_LENGTH: usize = 64 * 1024;

    /// Create a codec with the default line limit.
    pub fn new() -> Self {
        Self::with_max_length(Self::DEFAULT_MAX_LENGTH)
    }

    /// Create a codec that rejects lines longer than `max_length`.
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }

    fn lift(&self, err: LinesCodecError) -> ProtocolError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => ProtocolError::LineTooLong(self.max_length),
            LinesCodecError::Io(e) => ProtocolError::Io(e),
        }
    }

    fn parse(line: String) -> Option<Result<Record, ProtocolError>> {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            None
        } else {
            Some(line.parse())
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = Record;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Record>, ProtocolError> {
        loop {
            match self.lines.decode(src).map_err(|e| self.lift(e))? {
                Some(line) => match Self::parse(line) {
                    Some(result) => return result.map(Some),
                    None => continue,
                },
                None => return Ok(None),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Record>, ProtocolError> {
        loop {
            match self.lines.decode_eof(src).map_err(|e| self.lift(e))? {
                Some(line) => match Self::parse(line) {
                    Some(result) => return result.map(Some),
                    None => continue,
                },
                None => return Ok(None),
            }
        }
    }
}

impl Encoder<Record> for RecordCodec {
    type Error = ProtocolError;

    fn encode(&mut self, record: Record, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        self.lines
            .encode(record.to_string(), dst)
            .map_err(|e| self.lift(e))
    }
}
