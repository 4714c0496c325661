mod body;
mod client;
mod request;
mod wake;

pub use body::{RequestBody, ResponseBody};
pub use client::ClientConnection;
pub use request::ClientRequest;

pub(crate) use client::{ConnShared, TransportReader, TransportWriter};
pub(crate) use request::WritePhase;

use crate::log::Logger;

pub(crate) fn connection_logger() -> Logger {
    crate::log::logger("http:client:connection")
}

pub(crate) fn request_logger() -> Logger {
    crate::log::logger("http:client:request")
}
