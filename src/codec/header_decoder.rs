use bytes::{Buf, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode, Version};
use httparse::Status;
use snafu::ensure;
use tokio_util::codec::Decoder;

use crate::codec::error::TooLargeHeaderSnafu;
use crate::codec::DecodeError;
use crate::codec::DecodeError::{InvalidHeader, TooManyHeaders};
use crate::log_trace;
use crate::protocol::ResponseHead;

const MAX_HEADER_NUM: usize = 64;
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Parses one response head (status line + headers up to CRLFCRLF) off the
/// read buffer.
pub struct HeaderDecoder;

impl Decoder for HeaderDecoder {
    type Item = ResponseHead;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
        let mut response = httparse::Response::new(&mut headers);

        let parsed_result = response.parse(src.as_ref()).map_err(|e| match e {
            httparse::Error::TooManyHeaders => TooManyHeaders { max_num: MAX_HEADER_NUM, source: e },
            _ => InvalidHeader { source: e },
        });

        match parsed_result? {
            Status::Complete(body_offset) => {
                log_trace!(
                    crate::codec::codec_logger(),
                    "parsed response head, body offset {body_offset}"
                );
                ensure!(
                    body_offset <= MAX_HEADER_BYTES,
                    TooLargeHeaderSnafu { current_size: body_offset, max_size: MAX_HEADER_BYTES }
                );

                let head = build_head(&response)?;
                src.advance(body_offset);
                Ok(Some(head))
            }
            Status::Partial => {
                ensure!(
                    src.len() <= MAX_HEADER_BYTES,
                    TooLargeHeaderSnafu { current_size: src.len(), max_size: MAX_HEADER_BYTES }
                );
                Ok(None)
            }
        }
    }
}

fn build_head(response: &httparse::Response) -> Result<ResponseHead, DecodeError> {
    let status = response
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| DecodeError::UnsupportedHead { message: "invalid status code".into() })?;

    let version = match response.version {
        Some(0) => Version::HTTP_10,
        Some(1) => Version::HTTP_11,
        _ => {
            return Err(DecodeError::UnsupportedHead { message: "unknown http version".into() })
        }
    };

    let headers = collect_headers(response.headers)?;
    Ok(ResponseHead::new(status, version, headers))
}

fn collect_headers(parsed: &[httparse::Header]) -> Result<HeaderMap, DecodeError> {
    let mut headers = HeaderMap::with_capacity(parsed.len());
    for header in parsed {
        let name = HeaderName::from_bytes(header.name.as_bytes()).map_err(|_| {
            DecodeError::UnsupportedHead { message: format!("bad header name {}", header.name) }
        })?;
        let value = HeaderValue::from_bytes(header.value).map_err(|_| {
            DecodeError::UnsupportedHead { message: format!("bad value for header {name}") }
        })?;
        headers.append(name, value);
    }
    Ok(headers)
}

/// Parses a chunked-encoding trailer block. `src` holds the trailer lines
/// as they appeared on the wire, each terminated by CRLF, without the
/// final blank line.
pub(crate) fn parse_trailer(src: &[u8]) -> Result<HeaderMap, DecodeError> {
    if src.is_empty() {
        return Ok(HeaderMap::new());
    }

    let mut block = Vec::with_capacity(src.len() + 2);
    block.extend_from_slice(src);
    block.extend_from_slice(b"\r\n");

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADER_NUM];
    match httparse::parse_headers(&block, &mut headers) {
        Ok(Status::Complete((_, parsed))) => {
            collect_headers(parsed).map_err(|e| DecodeError::InvalidTrailer { message: e.to_string() })
        }
        Ok(Status::Partial) => {
            Err(DecodeError::InvalidTrailer { message: "truncated trailer block".into() })
        }
        Err(e) => Err(DecodeError::InvalidTrailer { message: e.to_string() }),
    }
}
