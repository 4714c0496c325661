use std::io;
use std::io::Write;

use bytes::BytesMut;

use tokio_util::codec::Encoder;

use crate::protocol::PayloadItem;

/// Chunked transfer-encoding framing. Every chunk is written as
/// `{len:X}\r\n{data}\r\n`; EOF emits the zero-sized chunk followed by the
/// trailer headers and the terminating blank line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedEncoder {
    eof: bool,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { eof: false }
    }
}

impl Default for ChunkedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<PayloadItem> for ChunkedEncoder {
    type Error = io::Error;

    fn encode(&mut self, item: PayloadItem, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.eof {
            return Ok(());
        }

        match item {
            PayloadItem::Chunk(bytes) => {
                if bytes.is_empty() {
                    // a zero-sized chunk would terminate the body
                    return Ok(());
                }
                write!(helper::Writer(dst), "{:X}\r\n", bytes.len())?;
                dst.reserve(bytes.len() + 2);
                dst.extend_from_slice(&bytes[..]);
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
            PayloadItem::Eof(trailer) => {
                self.eof = true;
                dst.extend_from_slice(b"0\r\n");
                for (name, value) in trailer.iter() {
                    dst.extend_from_slice(name.as_str().as_bytes());
                    dst.extend_from_slice(b": ");
                    dst.extend_from_slice(value.as_bytes());
                    dst.extend_from_slice(b"\r\n");
                }
                dst.extend_from_slice(b"\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl<'a> io::Write for Writer<'a> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::header::HeaderValue;
    use http::HeaderMap;

    #[test]
    fn chunks_and_terminator() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"he")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"llo")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof(HeaderMap::new()), &mut dst).unwrap();

        assert_eq!(&dst[..], b"2\r\nhe\r\n3\r\nllo\r\n0\r\n\r\n".as_slice());
    }

    #[test]
    fn trailer_on_eof() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        let mut trailer = HeaderMap::new();
        trailer.insert("x-checksum", HeaderValue::from_static("abc"));

        encoder.encode(PayloadItem::Chunk(Bytes::from_static(b"hello")), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof(trailer), &mut dst).unwrap();

        assert_eq!(&dst[..], b"5\r\nhello\r\n0\r\nx-checksum: abc\r\n\r\n".as_slice());
    }

    #[test]
    fn empty_chunk_skipped() {
        let mut encoder = ChunkedEncoder::new();
        let mut dst = BytesMut::new();

        encoder.encode(PayloadItem::Chunk(Bytes::new()), &mut dst).unwrap();
        encoder.encode(PayloadItem::Eof(HeaderMap::new()), &mut dst).unwrap();

        assert_eq!(&dst[..], b"0\r\n\r\n".as_slice());
    }
}
