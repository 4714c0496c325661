use bytes::Bytes;
use http::HeaderMap;

/// A single frame travelling through a framed transport half: either the
/// message head or a piece of its payload.
pub enum Message<T> {
    Header(T),
    Payload(PayloadItem),
}

impl<T> Message<T> {
    pub fn is_header(&self) -> bool {
        match self {
            Message::Header(_) => true,
            Message::Payload(_) => false,
        }
    }

    pub fn is_payload(&self) -> bool {
        !self.is_header()
    }

    pub fn into_payload_item(self) -> Option<PayloadItem> {
        match self {
            Message::Header(_) => None,
            Message::Payload(payload_item) => Some(payload_item),
        }
    }
}

impl<T> From<Bytes> for Message<T> {
    fn from(bytes: Bytes) -> Self {
        Self::Payload(PayloadItem::Chunk(bytes))
    }
}

/// One unit of body payload. `Eof` carries the trailer headers of the
/// message; for framings without trailers the map is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    Chunk(Bytes),
    Eof(HeaderMap),
}

impl PayloadItem {
    pub fn is_eof(&self) -> bool {
        match self {
            PayloadItem::Chunk(_) => false,
            PayloadItem::Eof(_) => true,
        }
    }

    pub fn is_chunk(&self) -> bool {
        !self.is_eof()
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof(_) => None,
        }
    }

    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            PayloadItem::Chunk(bytes) => Some(bytes),
            PayloadItem::Eof(_) => None,
        }
    }

    pub fn into_trailer(self) -> Option<HeaderMap> {
        match self {
            PayloadItem::Chunk(_) => None,
            PayloadItem::Eof(trailer) => Some(trailer),
        }
    }
}

/// How a message body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    /// No body at all.
    Empty,

    /// Content-Length framing with the exact byte count.
    Length(u64),

    /// Transfer-Encoding: chunked framing.
    Chunked,

    /// Close-delimited framing: the body ends when the peer closes the
    /// connection. Responses only.
    UntilClose,
}

impl PayloadSize {
    pub fn is_empty(&self) -> bool {
        matches!(self, PayloadSize::Empty)
    }

    pub fn is_chunked(&self) -> bool {
        matches!(self, PayloadSize::Chunked)
    }
}
