use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::WaitForCancellationFutureOwned;

use crate::connection::request::RequestShared;
use crate::connection::{request_logger, ConnShared, TransportReader, TransportWriter};
use crate::log_debug;
use crate::protocol::{HttpError, Message, PayloadItem, PayloadSize, RequestHead};

/// The streaming request body writer for one exchange.
///
/// Owns the transport's write half for the duration of the request's write
/// turn and releases it on [`finish`](Self::finish). Content-Length bodies
/// must write exactly the declared byte count; chunked bodies emit one
/// chunk per write and close with the zero chunk plus the request trailer.
pub struct RequestBody {
    guard: Option<OwnedMutexGuard<TransportWriter>>,
    shared: Arc<RequestShared>,
    conn: Arc<ConnShared>,
    expected: Option<u64>,
    written: u64,
    finished: bool,
}

impl RequestBody {
    pub(crate) fn new(
        guard: OwnedMutexGuard<TransportWriter>,
        shared: Arc<RequestShared>,
        conn: Arc<ConnShared>,
    ) -> Self {
        let expected = match shared.payload_size {
            PayloadSize::Length(length) => Some(length),
            _ => None,
        };
        Self { guard: Some(guard), shared, conn, expected, written: 0, finished: false }
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Writes one piece of the body. Empty writes are accepted and emit
    /// nothing. A Content-Length body rejects writes past the declared
    /// length before anything reaches the wire.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> crate::Result<()> {
        let data = data.into();
        if self.finished {
            return Err(HttpError::misuse("request body already finished"));
        }
        self.check_boundary()?;
        if data.is_empty() {
            return Ok(());
        }
        if let Some(expected) = self.expected {
            if self.written + data.len() as u64 > expected {
                return Err(HttpError::misuse("body exceeds declared content-length"));
            }
        }

        let len = data.len() as u64;
        self.send(Message::Payload(PayloadItem::Chunk(data))).await?;
        self.written += len;
        Ok(())
    }

    /// Closes the body: enforces the Content-Length contract (failing
    /// with `ShortWrite` and poisoning the write side when bytes are
    /// missing), emits the chunked terminator and trailer, and hands the
    /// write slot to the next pending request.
    pub async fn finish(mut self) -> crate::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.check_boundary()?;

        if let Some(expected) = self.expected {
            if self.written < expected {
                self.finished = true;
                let error = HttpError::ShortWrite { expected, written: self.written };
                self.conn.fail_write_side(Some(&self.shared), error.clone());
                return Err(error);
            }
        }

        let trailer = self.shared.lock_state().request_trailer.clone();
        self.send(Message::Payload(PayloadItem::Eof(trailer))).await?;

        self.finished = true;
        self.conn.finish_write_turn(&self.shared);
        self.guard.take();
        log_debug!(
            request_logger(),
            "request #{} body finished, {} bytes",
            self.shared.id,
            self.written
        );
        Ok(())
    }

    /// The graceful-cancel boundary: each write observes cancellation,
    /// abort, and sticky faults before touching the wire.
    fn check_boundary(&mut self) -> crate::Result<()> {
        let (cancelled, error) = {
            let rq = self.shared.lock_state();
            if rq.aborted {
                (false, Some(HttpError::Aborted))
            } else if let Some(fault) = &rq.fault {
                (false, Some(fault.clone()))
            } else if rq.cancelled {
                (true, Some(HttpError::Cancelled))
            } else {
                (false, None)
            }
        };

        match error {
            None => Ok(()),
            Some(error) => {
                self.finished = true;
                if cancelled {
                    // mid-message cancel leaves the wire unusable for
                    // anyone queued behind this request
                    self.conn.fail_write_side(Some(&self.shared), error.clone());
                }
                Err(error)
            }
        }
    }

    async fn send(&mut self, message: Message<(RequestHead, PayloadSize)>) -> crate::Result<()> {
        let guard = self
            .guard
            .as_mut()
            .ok_or_else(|| HttpError::misuse("request body already released"))?;

        let result = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => {
                self.finished = true;
                return Err(HttpError::Aborted);
            }
            result = SinkExt::send(&mut **guard, message) => result,
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                self.finished = true;
                let error = HttpError::from(e);
                self.conn.fail_write_side(Some(&self.shared), error.clone());
                Err(error)
            }
        }
    }
}

impl Drop for RequestBody {
    fn drop(&mut self) {
        if !self.finished {
            // the wire is mid-message; nothing behind this request can
            // be written safely
            self.conn.fail_write_side(
                Some(&self.shared),
                HttpError::misuse("request body dropped before finish"),
            );
        }
    }
}

enum ReadState {
    Streaming,
    Trailers,
    Done,
}

/// The streaming response body reader for one exchange, exposed as an
/// [`http_body::Body`]: data frames first, then the trailer as a trailers
/// frame (also recorded on the request for `response_trailer`).
///
/// Owns the transport's read half until EOF; reaching EOF retires the
/// request and hands the read slot to the next waiting response. Dropping
/// the reader mid-stream leaves undecoded body bytes on the wire, so it
/// poisons the read side and the connection stops accepting requests.
pub struct ResponseBody {
    guard: Option<OwnedMutexGuard<TransportReader>>,
    shared: Arc<RequestShared>,
    conn: Arc<ConnShared>,
    abort: Pin<Box<WaitForCancellationFutureOwned>>,
    content_length: Option<u64>,
    trailer: Option<HeaderMap>,
    state: ReadState,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl ResponseBody {
    pub(crate) fn new(
        guard: OwnedMutexGuard<TransportReader>,
        shared: Arc<RequestShared>,
        conn: Arc<ConnShared>,
        payload: PayloadSize,
    ) -> Self {
        let content_length = match payload {
            PayloadSize::Length(length) => Some(length),
            _ => None,
        };
        let abort = Box::pin(conn.abort.clone().cancelled_owned());
        Self {
            guard: Some(guard),
            shared,
            conn,
            abort,
            content_length,
            trailer: None,
            state: ReadState::Streaming,
        }
    }

    fn fail(&mut self, error: HttpError) {
        self.conn.fail_read_side(Some(&self.shared), error);
        self.guard.take();
        self.state = ReadState::Done;
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = HttpError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            match this.state {
                ReadState::Done => return Poll::Ready(None),

                ReadState::Trailers => {
                    this.state = ReadState::Done;
                    match this.trailer.take() {
                        Some(trailer) if !trailer.is_empty() => {
                            return Poll::Ready(Some(Ok(Frame::trailers(trailer))));
                        }
                        _ => return Poll::Ready(None),
                    }
                }

                ReadState::Streaming => {
                    if this.abort.as_mut().poll(cx).is_ready() {
                        this.fail(HttpError::Aborted);
                        return Poll::Ready(Some(Err(HttpError::Aborted)));
                    }

                    let guard = match this.guard.as_mut() {
                        Some(guard) => guard,
                        None => {
                            this.state = ReadState::Done;
                            return Poll::Ready(None);
                        }
                    };

                    match ready!((**guard).poll_next_unpin(cx)) {
                        Some(Ok(Message::Payload(PayloadItem::Chunk(bytes)))) => {
                            return Poll::Ready(Some(Ok(Frame::data(bytes))));
                        }
                        Some(Ok(Message::Payload(PayloadItem::Eof(trailer)))) => {
                            let close = {
                                let mut rq = this.shared.lock_state();
                                rq.response_trailer = Some(trailer.clone());
                                rq.response_done = true;
                                rq.response_close
                            };
                            this.conn.finish_read_turn(&this.shared, close);
                            this.guard.take();
                            this.trailer = Some(trailer);
                            this.state = ReadState::Trailers;
                        }
                        Some(Ok(Message::Header(_))) => {
                            let error = HttpError::framing("response head inside a body");
                            this.fail(error.clone());
                            return Poll::Ready(Some(Err(error)));
                        }
                        Some(Err(decode_error)) => {
                            let error = HttpError::from(decode_error);
                            this.fail(error.clone());
                            return Poll::Ready(Some(Err(error)));
                        }
                        None => {
                            let error = HttpError::ConnectionClosed;
                            this.fail(error.clone());
                            return Poll::Ready(Some(Err(error)));
                        }
                    }
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.state, ReadState::Done)
    }

    fn size_hint(&self) -> SizeHint {
        match self.content_length {
            Some(length) => SizeHint::with_exact(length),
            None => SizeHint::default(),
        }
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        if !matches!(self.state, ReadState::Done | ReadState::Trailers) {
            self.conn.fail_read_side(
                Some(&self.shared),
                HttpError::misuse("response body dropped before end of stream"),
            );
        }
    }
}
