pub mod codec;
pub mod connection;
pub mod log;
pub mod protocol;

pub use connection::{ClientConnection, ClientRequest, RequestBody, ResponseBody};
pub use protocol::{HttpError, RequestHead, ResponseHead};

pub type Result<T> = std::result::Result<T, HttpError>;
