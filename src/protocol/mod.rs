mod error;
mod message;
mod request;
mod response;

pub use error::HttpError;
pub use message::Message;
pub use message::PayloadItem;
pub use message::PayloadSize;
pub use request::RequestHead;
pub use response::ResponseHead;

use http::HeaderMap;

/// Checks whether the `Connection` header carries the given token
/// (comma-separated list, case-insensitive).
pub(crate) fn connection_has_token(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(http::header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}
