use http::{HeaderMap, StatusCode, Version};

use crate::protocol::{connection_has_token, HttpError, PayloadSize};

/// The status line and headers of one HTTP/1.x response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

impl ResponseHead {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap) -> Self {
        Self { status, version, headers }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_informational(&self) -> bool {
        self.status.is_informational()
    }

    /// Whether the server will close the connection after this response.
    pub fn close_after(&self) -> bool {
        match self.version {
            Version::HTTP_10 => !connection_has_token(&self.headers, "keep-alive"),
            _ => connection_has_token(&self.headers, "close"),
        }
    }

    /// Selects the response body framing per RFC 7230 section 3.3:
    /// 1xx/204/304 and HEAD responses carry no body; otherwise chunked
    /// wins over Content-Length, and neither means close-delimited.
    pub fn payload_size(&self, head_request: bool) -> Result<PayloadSize, HttpError> {
        if head_request
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return Ok(PayloadSize::Empty);
        }

        if let Some(te_value) = self.headers.get(http::header::TRANSFER_ENCODING) {
            let chunked = te_value
                .to_str()
                .ok()
                .and_then(|encodings| encodings.rsplit(',').next())
                .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
                .unwrap_or(false);
            if chunked {
                return Ok(PayloadSize::Chunked);
            }
            return Err(HttpError::framing("unsupported transfer-encoding on response"));
        }

        if let Some(cl_value) = self.headers.get(http::header::CONTENT_LENGTH) {
            let length = cl_value
                .to_str()
                .ok()
                .and_then(|value| value.trim().parse::<u64>().ok())
                .ok_or_else(|| HttpError::framing("invalid content-length on response"))?;
            if length == 0 {
                return Ok(PayloadSize::Empty);
            }
            return Ok(PayloadSize::Length(length));
        }

        Ok(PayloadSize::UntilClose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn head(status: u16) -> ResponseHead {
        ResponseHead::new(
            StatusCode::from_u16(status).unwrap(),
            Version::HTTP_11,
            HeaderMap::new(),
        )
    }

    #[test]
    fn no_content_has_no_body() {
        assert_eq!(head(204).payload_size(false).unwrap(), PayloadSize::Empty);
        assert_eq!(head(304).payload_size(false).unwrap(), PayloadSize::Empty);
        assert_eq!(head(100).payload_size(false).unwrap(), PayloadSize::Empty);
        assert_eq!(head(200).payload_size(true).unwrap(), PayloadSize::Empty);
    }

    #[test]
    fn framing_selection() {
        let mut ok = head(200);
        assert_eq!(ok.payload_size(false).unwrap(), PayloadSize::UntilClose);

        ok.headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("3"));
        assert_eq!(ok.payload_size(false).unwrap(), PayloadSize::Length(3));

        let mut chunked = head(200);
        chunked
            .headers
            .insert(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert_eq!(chunked.payload_size(false).unwrap(), PayloadSize::Chunked);
    }
}
