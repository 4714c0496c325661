use bytes::BytesMut;
use std::io;
use std::io::ErrorKind;

use tokio_util::codec::Encoder;

use crate::codec::body::PayloadEncoder;
use crate::codec::HeaderEncoder;
use crate::protocol::{Message, PayloadSize, RequestHead};

/// Encodes one request after another onto the write half: each `Header`
/// frame installs the payload encoder for the body frames that follow it.
pub struct RequestEncoder {
    header_encoder: HeaderEncoder,
    payload_encoder: Option<PayloadEncoder>,
}

impl RequestEncoder {
    pub fn new() -> Self {
        Self { header_encoder: HeaderEncoder, payload_encoder: None }
    }
}

impl Default for RequestEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<Message<(RequestHead, PayloadSize)>> for RequestEncoder {
    type Error = io::Error;

    fn encode(
        &mut self,
        item: Message<(RequestHead, PayloadSize)>,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        match item {
            Message::Header((head, payload_size)) => {
                self.header_encoder.encode(head, dst)?;
                self.payload_encoder = Some(PayloadEncoder::for_size(payload_size));
                Ok(())
            }

            Message::Payload(payload_item) => {
                let encoder = self
                    .payload_encoder
                    .as_mut()
                    .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "payload before header"))?;

                let eof = payload_item.is_eof();
                encoder.encode(payload_item, dst)?;
                if eof {
                    // request complete, the next frame must be a header
                    self.payload_encoder.take();
                }
                Ok(())
            }
        }
    }
}
