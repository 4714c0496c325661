use bytes::BytesMut;
use std::io;

use tokio_util::codec::Encoder;

use crate::protocol::PayloadItem;

/// Content-Length framing: body bytes pass through unchanged, EOF emits
/// nothing. The byte-count accounting lives in the request body adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LengthEncoder {
    eof: bool,
}

impl LengthEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }
}

impl Default for LengthEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<PayloadItem> for LengthEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                dst.extend_from_slice(&bytes[..]);
                Ok(())
            }
            PayloadItem::Eof(_) => {
                self.eof = true;
                Ok(())
            }
        }
    }
}
