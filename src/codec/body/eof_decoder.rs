use bytes::BytesMut;
use http::HeaderMap;
use tokio_util::codec::Decoder;

use crate::codec::DecodeError;
use crate::protocol::PayloadItem;

/// Close-delimited framing: every byte belongs to the body and the body
/// ends when the transport reaches EOF (signalled through `decode_eof`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EofDecoder {
    finished: bool,
}

impl EofDecoder {
    pub fn new() -> Self {
        Self { finished: false }
    }
}

impl Default for EofDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EofDecoder {
    type Item = PayloadItem;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.finished {
            return Ok(Some(PayloadItem::Eof(HeaderMap::new())));
        }

        if src.is_empty() {
            return Ok(None);
        }

        let bytes = src.split_to(src.len()).freeze();
        Ok(Some(PayloadItem::Chunk(bytes)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            return self.decode(src);
        }

        if self.finished {
            return Ok(None);
        }

        self.finished = true;
        Ok(Some(PayloadItem::Eof(HeaderMap::new())))
    }
}
