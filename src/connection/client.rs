use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::{RequestEncoder, ResponseDecoder};
use crate::connection::request::RequestShared;
use crate::connection::{connection_logger, ClientRequest, WritePhase};
use crate::protocol::{HttpError, RequestHead};
use crate::{log_debug, log_error, log_warning};

const DEFAULT_READ_BUFFER: usize = 8 * 1024;

pub(crate) type TransportReader =
    FramedRead<Box<dyn AsyncRead + Send + Unpin>, ResponseDecoder>;
pub(crate) type TransportWriter =
    FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, RequestEncoder>;

/// A pipelined HTTP/1.x client connection.
///
/// Many logical requests share one transport. Request bytes are written in
/// submission order and responses are read back in that same order; the
/// connection grants the transport's write half to exactly one request at
/// a time (the head of the pending queue) and the read half to exactly one
/// request at a time (the head of the waiting-responses queue).
pub struct ClientConnection {
    shared: Arc<ConnShared>,
}

impl ClientConnection {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_capacity(stream, DEFAULT_READ_BUFFER)
    }

    pub fn with_capacity<S>(stream: S, read_buffer: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);

        let shared = Arc::new(ConnShared {
            writer: Arc::new(tokio::sync::Mutex::new(FramedWrite::new(
                writer,
                RequestEncoder::new(),
            ))),
            reader: Arc::new(tokio::sync::Mutex::new(FramedRead::with_capacity(
                reader,
                ResponseDecoder::new(),
                read_buffer,
            ))),
            abort: CancellationToken::new(),
            next_request_id: AtomicU64::new(1),
            state: Mutex::new(DispatchState::new()),
        });

        log_debug!(connection_logger(), "client connection created");
        Self { shared }
    }

    /// Admits one request. Returns immediately without any I/O: the
    /// returned handle performs the actual exchange.
    ///
    /// Fails with `ConnectionClosed` once the connection stopped accepting
    /// requests (a fault, or a close directive in either direction).
    pub fn request(&self, head: RequestHead) -> crate::Result<ClientRequest> {
        let payload_size = head.payload_size()?;
        let close = head.close_requested();
        let id = self.shared.next_request_id.fetch_add(1, Ordering::Relaxed);

        log_debug!(
            connection_logger(),
            "request #{id} submitted method={} uri={} close={close}",
            head.method(),
            head.uri()
        );

        let request = Arc::new(RequestShared::new(id, head, payload_size));

        let immediate = {
            let mut st = self.shared.lock_state();
            if !st.allow_new_requests {
                return Err(HttpError::ConnectionClosed);
            }

            st.pending.push_back(request.clone());
            if close {
                st.allow_new_requests = false;
            }
            let immediate = st.pending.len() == 1 && st.writing.is_none();
            st.check_invariants();
            immediate
        };

        if immediate {
            request.write_wake.wake();
        }

        Ok(ClientRequest::new(request, self.shared.clone()))
    }

    /// Whether `request` would currently be admitted.
    pub fn accepts_requests(&self) -> bool {
        self.shared.lock_state().allow_new_requests
    }
}

pub(crate) struct ConnShared {
    pub(crate) writer: Arc<tokio::sync::Mutex<TransportWriter>>,
    pub(crate) reader: Arc<tokio::sync::Mutex<TransportReader>>,

    /// Cancelled on abort; every transport await on this connection
    /// selects against it.
    pub(crate) abort: CancellationToken,

    next_request_id: AtomicU64,
    state: Mutex<DispatchState>,
}

pub(crate) struct DispatchState {
    /// Requests submitted but not yet past their request-write handoff,
    /// the currently writing one included, in submission order.
    pub(crate) pending: VecDeque<Arc<RequestShared>>,

    /// Requests past request-write but before response-complete, in
    /// submission order.
    pub(crate) waiting: VecDeque<Arc<RequestShared>>,

    pub(crate) allow_new_requests: bool,
    pub(crate) request_fault: Option<HttpError>,
    pub(crate) response_fault: Option<HttpError>,

    /// Id of the request holding the write slot, if any.
    pub(crate) writing: Option<u64>,

    /// Id of the request holding the read slot, if any.
    pub(crate) reading: Option<u64>,

    /// A close directive was seen: the transport shuts down as soon as
    /// the waiting-responses queue drains.
    pub(crate) close_pending: bool,
    pub(crate) transport_closed: bool,
}

impl DispatchState {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            waiting: VecDeque::new(),
            allow_new_requests: true,
            request_fault: None,
            response_fault: None,
            writing: None,
            reading: None,
            close_pending: false,
            transport_closed: false,
        }
    }

    /// Whether the pending close directive can take effect now. Flips the
    /// closed flag so the transport is shut down exactly once.
    pub(crate) fn maybe_close_locked(&mut self) -> bool {
        if self.close_pending && !self.transport_closed && self.waiting.is_empty() {
            self.transport_closed = true;
            true
        } else {
            false
        }
    }

    /// Debug-build structural assertions, run at lock release points.
    pub(crate) fn check_invariants(&self) {
        #[cfg(debug_assertions)]
        {
            let writers = self
                .pending
                .iter()
                .filter(|request| request.lock_state().write_phase == WritePhase::Writing)
                .count();
            debug_assert!(writers <= 1, "more than one request holds the write slot");
            debug_assert_eq!(self.writing.is_some(), writers == 1);
            if let Some(id) = self.writing {
                let front_is_writer = self
                    .pending
                    .front()
                    .map(|request| {
                        request.id == id
                            && request.lock_state().write_phase == WritePhase::Writing
                    })
                    .unwrap_or(false);
                debug_assert!(front_is_writer, "writer is not the head-of-line request");
            }
            for request in &self.pending {
                debug_assert!(
                    !self.waiting.iter().any(|other| Arc::ptr_eq(other, request)),
                    "request present in both queues"
                );
            }
            if self.allow_new_requests {
                debug_assert!(self.request_fault.is_none() && self.response_fault.is_none());
            }
            if self.close_pending {
                debug_assert!(!self.allow_new_requests);
            }
        }
    }
}

impl ConnShared {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Completes a request's write turn: hands the write slot to the next
    /// pending request and enters this one into the waiting-responses
    /// queue.
    pub(crate) fn finish_write_turn(&self, request: &Arc<RequestShared>) {
        let (next_writer, wake_reader) = {
            let mut st = self.lock_state();
            remove_from(&mut st.pending, request);
            if st.writing == Some(request.id) {
                st.writing = None;
            }
            request.lock_state().write_phase = WritePhase::Written;
            st.waiting.push_back(request.clone());

            let next_writer = st.pending.front().cloned();
            let wake_reader = st.reading.is_none()
                && st
                    .waiting
                    .front()
                    .map(|front| Arc::ptr_eq(front, request))
                    .unwrap_or(false);
            st.check_invariants();
            (next_writer, wake_reader)
        };

        if let Some(next) = next_writer {
            next.write_wake.wake();
        }
        if wake_reader {
            request.read_wake.wake();
        }
    }

    /// Completes a request's read turn and hands the read slot onward.
    /// With `close` set the connection stops accepting requests, every
    /// request still waiting for its response fails with
    /// `ConnectionClosed`, and the transport is shut down once the
    /// waiting-responses queue is empty.
    pub(crate) fn finish_read_turn(&self, request: &Arc<RequestShared>, close: bool) {
        let (wakes, close_now) = {
            let mut st = self.lock_state();
            remove_from(&mut st.waiting, request);
            if st.reading == Some(request.id) {
                st.reading = None;
            }

            let wakes: Vec<Arc<RequestShared>> = if close {
                st.allow_new_requests = false;
                st.close_pending = true;
                if st.response_fault.is_none() {
                    st.response_fault = Some(HttpError::ConnectionClosed);
                }
                st.waiting.iter().cloned().collect()
            } else {
                st.waiting.front().cloned().into_iter().collect()
            };
            let close_now = st.maybe_close_locked();
            st.check_invariants();
            (wakes, close_now)
        };

        if close_now {
            self.close_transport();
        }
        for waiter in wakes {
            waiter.read_wake.wake();
        }
    }

    /// Poisons the write side. Every pending request is woken so it can
    /// observe the fault; the transport is left open so outstanding
    /// response readers may still drain.
    pub(crate) fn fail_write_side(&self, source: Option<&Arc<RequestShared>>, error: HttpError) {
        let wakes = {
            let mut st = self.lock_state();
            if st.request_fault.is_none() {
                st.request_fault = Some(error.clone());
            }
            st.allow_new_requests = false;

            if let Some(request) = source {
                {
                    let mut rq = request.lock_state();
                    if rq.fault.is_none() {
                        rq.fault = Some(error.clone());
                    }
                    rq.write_phase = WritePhase::Failed;
                }
                remove_from(&mut st.pending, request);
                if st.writing == Some(request.id) {
                    st.writing = None;
                }
            }

            let wakes: Vec<Arc<RequestShared>> = st.pending.iter().cloned().collect();
            st.check_invariants();
            wakes
        };

        log_error!(connection_logger(), "write side faulted: {error}");
        for waiter in wakes {
            waiter.write_wake.wake();
        }
    }

    /// Poisons the read side and wakes every waiting response reader.
    pub(crate) fn fail_read_side(&self, source: Option<&Arc<RequestShared>>, error: HttpError) {
        let (wakes, close_now) = {
            let mut st = self.lock_state();
            if st.response_fault.is_none() {
                st.response_fault = Some(error.clone());
            }
            st.allow_new_requests = false;

            if let Some(request) = source {
                {
                    let mut rq = request.lock_state();
                    if rq.fault.is_none() {
                        rq.fault = Some(error.clone());
                    }
                }
                remove_from(&mut st.waiting, request);
                if st.reading == Some(request.id) {
                    st.reading = None;
                }
            }

            let wakes: Vec<Arc<RequestShared>> = st.waiting.iter().cloned().collect();
            let close_now = st.maybe_close_locked();
            st.check_invariants();
            (wakes, close_now)
        };

        log_error!(connection_logger(), "read side faulted: {error}");
        if close_now {
            self.close_transport();
        }
        for waiter in wakes {
            waiter.read_wake.wake();
        }
    }

    /// Force-fails the whole connection on behalf of `source`: both sides
    /// are poisoned with `Aborted`, every transport await is woken through
    /// the cancellation token, the transport is shut down, and no request
    /// is admitted again.
    pub(crate) fn abort_from(&self, source: &Arc<RequestShared>) {
        let (wakes, close_now) = {
            let mut st = self.lock_state();
            {
                let mut rq = source.lock_state();
                if rq.aborted {
                    return;
                }
                rq.aborted = true;
                if rq.fault.is_none() {
                    rq.fault = Some(HttpError::Aborted);
                }
            }

            st.allow_new_requests = false;
            if st.request_fault.is_none() {
                st.request_fault = Some(HttpError::Aborted);
            }
            if st.response_fault.is_none() {
                st.response_fault = Some(HttpError::Aborted);
            }

            remove_from(&mut st.pending, source);
            if st.writing == Some(source.id) {
                st.writing = None;
                source.lock_state().write_phase = WritePhase::Failed;
            }
            remove_from(&mut st.waiting, source);
            if st.reading == Some(source.id) {
                st.reading = None;
            }

            let mut wakes: Vec<Arc<RequestShared>> = st.pending.iter().cloned().collect();
            wakes.extend(st.waiting.iter().cloned());
            // abort closes immediately, without waiting for readers to drain
            st.close_pending = true;
            let close_now = !st.transport_closed;
            st.transport_closed = true;
            st.check_invariants();
            (wakes, close_now)
        };

        log_warning!(connection_logger(), "request #{} aborted the connection", source.id);
        self.abort.cancel();
        if close_now {
            self.close_transport();
        }
        for waiter in wakes {
            waiter.write_wake.wake();
            waiter.read_wake.wake();
        }
    }

    /// Shuts down the transport's write half from a freshly spawned task:
    /// the caller sits under the state lock or inside a poll, and the
    /// writer mutex may still be held by a releasing body adapter.
    pub(crate) fn close_transport(&self) {
        log_debug!(connection_logger(), "shutting down the transport");
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut guard = writer.lock().await;
            let _ = guard.get_mut().shutdown().await;
        });
    }
}

pub(crate) fn remove_from(
    queue: &mut VecDeque<Arc<RequestShared>>,
    request: &Arc<RequestShared>,
) -> bool {
    if let Some(position) = queue.iter().position(|other| Arc::ptr_eq(other, request)) {
        queue.remove(position);
        true
    } else {
        false
    }
}
