use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::codec::body::PayloadDecoder;
use crate::codec::{DecodeError, HeaderDecoder};
use crate::protocol::{Message, PayloadItem, ResponseHead};

/// Decodes one response after another off the read half.
///
/// Interim 1xx heads are emitted without installing a payload decoder, so
/// the stream keeps producing heads until the final one arrives. Response
/// body framing depends on the request method, which the decoder cannot
/// see on the wire; the read turn sets `set_head_request` before the first
/// head of each exchange.
pub struct ResponseDecoder {
    header_decoder: HeaderDecoder,
    payload_decoder: Option<PayloadDecoder>,
    head_request: bool,
}

impl ResponseDecoder {
    pub fn new() -> Self {
        Self { header_decoder: HeaderDecoder, payload_decoder: None, head_request: false }
    }

    pub fn set_head_request(&mut self, head_request: bool) {
        self.head_request = head_request;
    }
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ResponseDecoder {
    type Item = Message<ResponseHead>;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // parse payload if have payload_decoder
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof(_)) => {
                    // this response is complete, expect the next head
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };

            return Ok(message);
        }

        // parse response head
        let message = match self.header_decoder.decode(src)? {
            Some(head) => {
                if !head.is_informational() {
                    let size = head
                        .payload_size(self.head_request)
                        .map_err(|e| DecodeError::InvalidFraming { message: e.to_string() })?;
                    self.payload_decoder = Some(PayloadDecoder::for_size(size));
                }
                Some(Message::Header(head))
            }
            None => None,
        };

        Ok(message)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(payload_decoder) = &mut self.payload_decoder {
            let message = match payload_decoder.decode_eof(src)? {
                Some(item @ PayloadItem::Chunk(_)) => Some(Message::Payload(item)),
                Some(item @ PayloadItem::Eof(_)) => {
                    self.payload_decoder.take();
                    Some(Message::Payload(item))
                }
                None => None,
            };
            return Ok(message);
        }

        if src.is_empty() {
            // clean EOF between responses
            return Ok(None);
        }

        match self.decode(src)? {
            Some(message) => Ok(Some(message)),
            None => Err(DecodeError::UnsupportedHead {
                message: "truncated at connection close".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use indoc::indoc;

    fn decode_all(decoder: &mut ResponseDecoder, raw: &str) -> Vec<Message<ResponseHead>> {
        let mut buf = BytesMut::from(raw);
        let mut messages = Vec::new();
        while let Some(message) = decoder.decode(&mut buf).unwrap() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn head_then_body_then_next_head() {
        let raw = indoc! {"
            HTTP/1.1 200 OK\r
            Content-Length: 2\r
            \r
            okHTTP/1.1 204 No Content\r
            \r
        "};

        let mut decoder = ResponseDecoder::new();
        let messages = decode_all(&mut decoder, raw);

        assert!(messages[0].is_header());
        assert_eq!(chunk_str(&messages[1]), Some("ok"));
        assert!(matches!(&messages[2], Message::Payload(item) if item.is_eof()));
        assert!(messages[3].is_header());
        // 204 carries no body: its payload decoder reports EOF at once
        assert!(matches!(&messages[4], Message::Payload(item) if item.is_eof()));
    }

    #[test]
    fn interim_head_keeps_header_mode() {
        let raw = indoc! {"
            HTTP/1.1 100 Continue\r
            \r
            HTTP/1.1 200 OK\r
            Content-Length: 0\r
            \r
        "};

        let mut decoder = ResponseDecoder::new();
        let messages = decode_all(&mut decoder, raw);

        match &messages[0] {
            Message::Header(head) => assert!(head.is_informational()),
            _ => panic!("expected interim head"),
        }
        match &messages[1] {
            Message::Header(head) => assert_eq!(head.status(), StatusCode::OK),
            _ => panic!("expected final head"),
        }
    }

    #[test]
    fn head_request_has_no_body() {
        let raw = "HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n";

        let mut decoder = ResponseDecoder::new();
        decoder.set_head_request(true);
        let messages = decode_all(&mut decoder, raw);

        assert!(messages[0].is_header());
        assert!(matches!(&messages[1], Message::Payload(item) if item.is_eof()));
    }

    fn chunk_str(message: &Message<ResponseHead>) -> Option<&str> {
        match message {
            Message::Payload(PayloadItem::Chunk(bytes)) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}
