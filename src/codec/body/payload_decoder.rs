use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::{ChunkedDecoder, EofDecoder, LengthDecoder};
use crate::codec::DecodeError;
use crate::protocol::{PayloadItem, PayloadSize};

/// Decodes the payload of one response body.
pub struct PayloadDecoder {
    kind: Kind,
}

enum Kind {
    /// content-length payload (zero length doubles as "no body")
    Length(LengthDecoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedDecoder),

    /// close-delimited payload
    UntilClose(EofDecoder),
}

impl PayloadDecoder {
    /// create an empty `PayloadDecoder`
    pub fn empty() -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(0)) }
    }

    /// create a chunked `PayloadDecoder`
    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedDecoder::new()) }
    }

    /// create a fixed length `PayloadDecoder`
    pub fn length(size: u64) -> Self {
        Self { kind: Kind::Length(LengthDecoder::new(size)) }
    }

    /// create a close-delimited `PayloadDecoder`
    pub fn until_close() -> Self {
        Self { kind: Kind::UntilClose(EofDecoder::new()) }
    }

    pub fn for_size(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Empty => Self::empty(),
            PayloadSize::Length(length) => Self::length(length),
            PayloadSize::Chunked => Self::chunked(),
            PayloadSize::UntilClose => Self::until_close(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(&self.kind, Kind::Length(decoder) if *decoder == LengthDecoder::new(0))
    }
}

impl Decoder for PayloadDecoder {
    type Item = PayloadItem;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::Length(length_decoder) => length_decoder.decode(src),
            Kind::Chunked(chunked_decoder) => chunked_decoder.decode(src),
            Kind::UntilClose(eof_decoder) => eof_decoder.decode(src),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match &mut self.kind {
            Kind::UntilClose(eof_decoder) => eof_decoder.decode_eof(src),
            _ => match self.decode(src)? {
                Some(item) => Ok(Some(item)),
                None => Err(DecodeError::Body { message: "connection closed mid-body".into() }),
            },
        }
    }
}
