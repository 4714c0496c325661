mod body;
mod error;
mod header_decoder;
mod header_encoder;
mod request_encoder;
mod response_decoder;

pub use body::{
    ChunkedDecoder, ChunkedEncoder, EofDecoder, LengthDecoder, LengthEncoder, PayloadDecoder,
    PayloadEncoder,
};
pub use error::DecodeError;
pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
pub use request_encoder::RequestEncoder;
pub use response_decoder::ResponseDecoder;

use crate::log::Logger;

pub(crate) fn codec_logger() -> Logger {
    crate::log::logger("http:client:codec")
}
