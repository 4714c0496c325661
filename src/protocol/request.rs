use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Uri, Version};

use crate::protocol::{connection_has_token, HttpError, PayloadSize};

/// The request line and headers of one HTTP/1.x request, immutable after
/// submission to a connection.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestHead {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self { method, uri, version: Version::HTTP_11, headers: HeaderMap::new() }
    }

    pub fn get(uri: Uri) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Builder-style header insertion.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    /// Whether this request asks the server to close the connection after
    /// the exchange: `Connection: close` on HTTP/1.1, or an HTTP/1.0
    /// request without `Connection: keep-alive`.
    pub fn close_requested(&self) -> bool {
        match self.version {
            Version::HTTP_10 => !connection_has_token(&self.headers, "keep-alive"),
            _ => connection_has_token(&self.headers, "close"),
        }
    }

    /// Derives the request body framing from the submitted headers.
    ///
    /// Content-Length and Transfer-Encoding are mutually exclusive on the
    /// request side; supplying both is rejected before any byte is written.
    pub fn payload_size(&self) -> Result<PayloadSize, HttpError> {
        let te_header = self.headers.get(http::header::TRANSFER_ENCODING);
        let cl_header = self.headers.get(http::header::CONTENT_LENGTH);

        match (te_header, cl_header) {
            (None, None) => Ok(PayloadSize::Empty),

            (Some(te_value), None) => {
                if is_chunked(te_value) {
                    Ok(PayloadSize::Chunked)
                } else {
                    Err(HttpError::misuse("unsupported transfer-encoding on request"))
                }
            }

            (None, Some(cl_value)) => {
                let length = cl_value
                    .to_str()
                    .ok()
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .ok_or_else(|| HttpError::misuse("invalid content-length on request"))?;
                if length == 0 {
                    Ok(PayloadSize::Empty)
                } else {
                    Ok(PayloadSize::Length(length))
                }
            }

            (Some(_), Some(_)) => {
                Err(HttpError::misuse("transfer-encoding and content-length both present"))
            }
        }
    }
}

impl From<http::request::Parts> for RequestHead {
    fn from(parts: http::request::Parts) -> Self {
        Self { method: parts.method, uri: parts.uri, version: parts.version, headers: parts.headers }
    }
}

fn is_chunked(value: &HeaderValue) -> bool {
    value
        .to_str()
        .ok()
        .and_then(|encodings| encodings.rsplit(',').next())
        .map(|last_encoding| last_encoding.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}
