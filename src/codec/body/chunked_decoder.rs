use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use tokio_util::codec::Decoder;

use crate::codec::body::chunked_decoder::ChunkedState::*;
use crate::codec::header_decoder::parse_trailer;
use crate::codec::DecodeError;
use crate::protocol::PayloadItem;

/// Chunked transfer-encoding reader. Unlike a server-side decoder this one
/// keeps the trailer block: the parsed headers ride out on the `Eof` item.
pub struct ChunkedDecoder {
    state: ChunkedState,
    remaining_size: u64,
    trailer_block: BytesMut,
    trailer: Option<HeaderMap>,
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self { state: Size, remaining_size: 0, trailer_block: BytesMut::new(), trailer: None }
    }

    fn finished_trailer(&self) -> HeaderMap {
        self.trailer.clone().unwrap_or_default()
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChunkedState {
    Size,
    SizeLws,
    Extension,
    SizeLf,
    Body,
    BodyCr,
    BodyLf,
    Trailer,
    TrailerLf,
    EndCr,
    EndLf,
    End,
}

impl Decoder for ChunkedDecoder {
    type Item = PayloadItem;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            if self.state == End {
                return Ok(Some(PayloadItem::Eof(self.finished_trailer())));
            }

            if src.is_empty() {
                return Ok(None);
            }

            match self.step(src)? {
                Some(bytes) => return Ok(Some(PayloadItem::Chunk(bytes))),
                None => continue,
            }
        }
    }
}

impl ChunkedDecoder {
    fn step(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match self.state {
            Size => self.read_size(src),
            SizeLws => self.read_size_lws(src),
            Extension => self.read_extension(src),
            SizeLf => self.read_size_lf(src),
            Body => self.read_body(src),
            BodyCr => self.read_body_cr(src),
            BodyLf => self.read_body_lf(src),
            Trailer => self.read_trailer(src),
            TrailerLf => self.read_trailer_lf(src),
            EndCr => self.read_end_cr(src),
            EndLf => self.read_end_lf(src),
            End => Ok(None),
        }
    }

    fn read_size(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        macro_rules! or_overflow {
            ($e:expr) => {
                match $e {
                    Some(val) => val,
                    None => {
                        return Err(DecodeError::Body { message: "chunk size overflow".into() })
                    }
                }
            };
        }

        let radix = 16;
        match src.get_u8() {
            b @ b'0'..=b'9' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b - b'0') as u64));
            }
            b @ b'a'..=b'f' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b + 10 - b'a') as u64));
            }
            b @ b'A'..=b'F' => {
                self.remaining_size = or_overflow!(self.remaining_size.checked_mul(radix));
                self.remaining_size =
                    or_overflow!(self.remaining_size.checked_add((b + 10 - b'A') as u64));
            }
            b'\t' | b' ' => self.state = SizeLws,
            b';' => self.state = Extension,
            b'\r' => self.state = SizeLf,
            _ => return Err(DecodeError::Body { message: "invalid chunk size line".into() }),
        }

        Ok(None)
    }

    fn read_size_lws(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        // LWS can follow the chunk size, but no more digits can come
        match src.get_u8() {
            b'\t' | b' ' => Ok(None),
            b';' => {
                self.state = Extension;
                Ok(None)
            }
            b'\r' => {
                self.state = SizeLf;
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid chunk size linear white space".into() }),
        }
    }

    fn read_extension(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        // Extensions are ignored, but a bare LF inside one is rejected so a
        // sloppy peer cannot smuggle a line ending past us.
        match src.get_u8() {
            b'\r' => {
                self.state = SizeLf;
                Ok(None)
            }
            b'\n' => {
                Err(DecodeError::Body { message: "chunk extension contains newline".into() })
            }
            _ => Ok(None),
        }
    }

    fn read_size_lf(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\n' => {
                self.state = if self.remaining_size == 0 { EndCr } else { Body };
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid chunk size LF".into() }),
        }
    }

    fn read_body(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.remaining_size == 0 {
            self.state = BodyCr;
            return Ok(None);
        }

        // cap remaining bytes at the max capacity of usize
        let remaining = match self.remaining_size {
            r if r > usize::MAX as u64 => usize::MAX,
            r => r as usize,
        };

        let read_size = std::cmp::min(remaining, src.len());

        self.remaining_size -= read_size as u64;
        let bytes = src.split_to(read_size).freeze();

        if self.remaining_size == 0 {
            self.state = BodyCr;
        }
        Ok(Some(bytes))
    }

    fn read_body_cr(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\r' => {
                self.state = BodyLf;
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid chunk body CR".into() }),
        }
    }

    fn read_body_lf(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\n' => {
                self.state = Size;
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid chunk body LF".into() }),
        }
    }

    fn read_trailer(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\r' => self.state = TrailerLf,
            b => self.trailer_block.extend_from_slice(&[b]),
        }
        Ok(None)
    }

    fn read_trailer_lf(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\n' => {
                self.trailer_block.extend_from_slice(b"\r\n");
                self.state = EndCr;
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid trailer line LF".into() }),
        }
    }

    fn read_end_cr(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\r' => {
                self.state = EndLf;
                Ok(None)
            }
            b => {
                // first byte of another trailer line
                self.trailer_block.extend_from_slice(&[b]);
                self.state = Trailer;
                Ok(None)
            }
        }
    }

    fn read_end_lf(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, DecodeError> {
        match src.get_u8() {
            b'\n' => {
                self.trailer = Some(parse_trailer(&self.trailer_block)?);
                self.state = End;
                Ok(None)
            }
            _ => Err(DecodeError::Body { message: "invalid chunk end LF".into() }),
        }
    }
}
