use bytes::BytesMut;
use std::io;
use std::io::ErrorKind;

use tokio_util::codec::Encoder;

use crate::codec::body::{ChunkedEncoder, LengthEncoder};
use crate::protocol::{PayloadItem, PayloadSize};

/// Encodes the payload of one request body.
pub struct PayloadEncoder {
    kind: Kind,
}

enum Kind {
    /// no body: only EOF is legal, and it emits nothing
    Empty,

    /// content-length payload
    Length(LengthEncoder),

    /// transfer-encoding chunked payload
    Chunked(ChunkedEncoder),
}

impl PayloadEncoder {
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    pub fn length() -> Self {
        Self { kind: Kind::Length(LengthEncoder::new()) }
    }

    pub fn chunked() -> Self {
        Self { kind: Kind::Chunked(ChunkedEncoder::new()) }
    }

    pub fn for_size(size: PayloadSize) -> Self {
        match size {
            PayloadSize::Empty => Self::empty(),
            PayloadSize::Length(_) => Self::length(),
            PayloadSize::Chunked => Self::chunked(),
            // requests are never close-delimited
            PayloadSize::UntilClose => Self::empty(),
        }
    }
}

impl Encoder<PayloadItem> for PayloadEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match &mut self.kind {
            Kind::Empty => match item {
                PayloadItem::Chunk(bytes) if !bytes.is_empty() => {
                    Err(io::Error::new(ErrorKind::InvalidInput, "body bytes on a bodyless request"))
                }
                _ => Ok(()),
            },
            Kind::Length(length_encoder) => length_encoder.encode(item, dst),
            Kind::Chunked(chunked_encoder) => chunked_encoder.encode(item, dst),
        }
    }
}
