use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The crate-wide error type.
///
/// `HttpError` is `Clone` because a connection fault is sticky: the first
/// transport or framing error on a side is recorded once and then surfaced
/// to every request that would have used that side. Underlying io errors
/// are shared through an `Arc` to make that replay possible.
#[derive(Debug, Clone, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    TransportIo(Arc<io::Error>),

    #[error("framing error: {reason}")]
    Framing { reason: String },

    #[error("request body closed after {written} of {expected} bytes")]
    ShortWrite { expected: u64, written: u64 },

    #[error("connection no longer accepts requests")]
    ConnectionClosed,

    #[error("request cancelled")]
    Cancelled,

    #[error("request aborted")]
    Aborted,

    #[error("protocol misuse: {reason}")]
    ProtocolMisuse { reason: String },
}

impl HttpError {
    pub(crate) fn framing(reason: impl Into<String>) -> Self {
        HttpError::Framing { reason: reason.into() }
    }

    pub(crate) fn misuse(reason: impl Into<String>) -> Self {
        HttpError::ProtocolMisuse { reason: reason.into() }
    }

    /// True for the error kinds that poison a connection side.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            HttpError::TransportIo { .. }
                | HttpError::Framing { .. }
                | HttpError::ShortWrite { .. }
                | HttpError::Aborted
        )
    }
}

impl From<io::Error> for HttpError {
    fn from(source: io::Error) -> Self {
        HttpError::TransportIo(Arc::new(source))
    }
}
