use snafu::prelude::*;

use std::io::Error as IoError;
use std::sync::Arc;

use crate::protocol::HttpError;

/// Errors produced while decoding response bytes off the transport.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DecodeError {
    #[snafu(display("response head of {current_size} bytes exceeds the {max_size} byte cap"))]
    TooLargeHeader { current_size: usize, max_size: usize },

    #[snafu(display("response head carries more than {max_num} headers"))]
    TooManyHeaders { max_num: usize, source: httparse::Error },

    #[snafu(display("malformed response head: {source}"))]
    InvalidHeader { source: httparse::Error },

    #[snafu(display("unsupported response head: {message}"))]
    UnsupportedHead { message: String },

    #[snafu(display("transport error while decoding a response: {source}"), context(false))]
    Io { source: IoError },

    #[snafu(display("response body framing cannot be determined: {message}"))]
    InvalidFraming { message: String },

    #[snafu(display("malformed response body: {message}"))]
    Body { message: String },

    #[snafu(display("malformed response trailer: {message}"))]
    InvalidTrailer { message: String },
}

impl From<DecodeError> for HttpError {
    fn from(error: DecodeError) -> Self {
        match error {
            DecodeError::Io { source } => HttpError::TransportIo(Arc::new(source)),
            other => HttpError::Framing { reason: other.to_string() },
        }
    }
}
