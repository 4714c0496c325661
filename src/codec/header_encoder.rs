use bytes::{BufMut, BytesMut};

use http::Version;
use std::io;
use std::io::ErrorKind;
use tokio_util::codec::Encoder;

use crate::log_error;
use crate::protocol::RequestHead;

/// Serializes a request head: request line, headers, terminating CRLF.
///
/// The head is written exactly as submitted; body framing headers are the
/// caller's responsibility and were already validated at admission.
pub struct HeaderEncoder;

impl Encoder<RequestHead> for HeaderEncoder {
    type Error = io::Error;

    fn encode(&mut self, head: RequestHead, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.put_slice(head.method().as_str().as_bytes());
        dst.put_slice(b" ");
        match head.uri().path_and_query() {
            Some(path_and_query) => dst.put_slice(path_and_query.as_str().as_bytes()),
            None => dst.put_slice(b"/"),
        }
        match head.version() {
            Version::HTTP_11 => dst.put_slice(b" HTTP/1.1\r\n"),
            Version::HTTP_10 => dst.put_slice(b" HTTP/1.0\r\n"),
            v => {
                log_error!(crate::codec::codec_logger(), "unsupported http version {v:?}");
                return Err(io::Error::from(ErrorKind::Unsupported));
            }
        }

        for (header_name, header_value) in head.headers().iter() {
            dst.put_slice(header_name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(header_value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;
    use http::{Method, Uri};

    #[test]
    fn request_line_and_headers() {
        let head = crate::protocol::RequestHead::new(Method::GET, Uri::from_static("/a?x=1"))
            .with_header(http::header::HOST, HeaderValue::from_static("example.com"));

        let mut dst = BytesMut::new();
        HeaderEncoder.encode(head, &mut dst).unwrap();

        assert_eq!(&dst[..], b"GET /a?x=1 HTTP/1.1\r\nhost: example.com\r\n\r\n".as_slice());
    }

    #[test]
    fn http_10_request_line() {
        let mut head = crate::protocol::RequestHead::get(Uri::from_static("/"));
        head.set_version(Version::HTTP_10);

        let mut dst = BytesMut::new();
        HeaderEncoder.encode(head, &mut dst).unwrap();

        assert_eq!(&dst[..], b"GET / HTTP/1.0\r\n\r\n".as_slice());
    }
}
