use std::sync::{Arc, Mutex, MutexGuard};

use futures::SinkExt;
use http::HeaderMap;
use http_body_util::BodyExt;
use tokio::sync::OwnedMutexGuard;

use crate::connection::body::{RequestBody, ResponseBody};
use crate::connection::client::remove_from;
use crate::connection::wake::WakeToken;
use crate::connection::{request_logger, ConnShared, TransportWriter};
use crate::protocol::{HttpError, Message, PayloadItem, PayloadSize, RequestHead, ResponseHead};
use crate::{log_debug, log_trace, log_verbose};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WritePhase {
    Queued,
    Writing,
    Written,
    Failed,
}

pub(crate) struct RequestShared {
    pub(crate) id: u64,
    pub(crate) head: RequestHead,
    pub(crate) payload_size: PayloadSize,
    pub(crate) write_wake: WakeToken,
    pub(crate) read_wake: WakeToken,
    state: Mutex<RequestState>,
}

pub(crate) struct RequestState {
    pub(crate) write_phase: WritePhase,
    pub(crate) response: Option<ResponseHead>,
    pub(crate) response_payload: PayloadSize,
    pub(crate) response_close: bool,
    pub(crate) response_body_taken: bool,
    pub(crate) request_trailer: HeaderMap,
    pub(crate) response_trailer: Option<HeaderMap>,
    pub(crate) response_done: bool,
    pub(crate) cancelled: bool,
    pub(crate) aborted: bool,

    /// Per-request sticky error: the first fault this request observed.
    pub(crate) fault: Option<HttpError>,
}

impl RequestShared {
    pub(crate) fn new(id: u64, head: RequestHead, payload_size: PayloadSize) -> Self {
        Self {
            id,
            head,
            payload_size,
            write_wake: WakeToken::new(),
            read_wake: WakeToken::new(),
            state: Mutex::new(RequestState {
                write_phase: WritePhase::Queued,
                response: None,
                response_payload: PayloadSize::Empty,
                response_close: false,
                response_body_taken: false,
                request_trailer: HeaderMap::new(),
                response_trailer: None,
                response_done: false,
                cancelled: false,
                aborted: false,
                fault: None,
            }),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The handle for one logical HTTP exchange on a pipelined connection.
///
/// The typical flow: [`request_body`](Self::request_body) (when the
/// submitted headers declare one), then [`response`](Self::response), then
/// [`response_body`](Self::response_body) to EOF, then
/// [`response_trailer`](Self::response_trailer). [`finish`](Self::finish)
/// collapses all of that for callers that only care about the status.
pub struct ClientRequest {
    shared: Arc<RequestShared>,
    conn: Arc<ConnShared>,
}

impl std::fmt::Debug for ClientRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRequest")
            .field("id", &self.shared.id)
            .finish()
    }
}

impl ClientRequest {
    pub(crate) fn new(shared: Arc<RequestShared>, conn: Arc<ConnShared>) -> Self {
        Self { shared, conn }
    }

    pub fn head(&self) -> &RequestHead {
        &self.shared.head
    }

    /// The streaming request body writer.
    ///
    /// The first call parks until this request becomes the head-of-line
    /// writer, then sends the serialized request head and returns the
    /// framing writer. Fails with `ProtocolMisuse` when the submitted
    /// headers declare no body, or when the body was already started.
    pub async fn request_body(&self) -> crate::Result<RequestBody> {
        if self.shared.payload_size.is_empty() {
            return Err(HttpError::misuse("request declares no body"));
        }
        {
            let rq = self.shared.lock_state();
            if let Some(fault) = &rq.fault {
                return Err(fault.clone());
            }
            if rq.write_phase != WritePhase::Queued {
                return Err(HttpError::misuse("request body already started"));
            }
        }

        let guard = self.acquire_write_turn().await?;
        let guard = self.send_head(guard).await?;
        Ok(RequestBody::new(guard, self.shared.clone(), self.conn.clone()))
    }

    /// Sets the request trailer, sent after the final body chunk. Only
    /// meaningful for chunked request bodies, and only before the body is
    /// finished.
    pub fn set_request_trailer(&self, trailer: HeaderMap) -> crate::Result<()> {
        if !self.shared.payload_size.is_chunked() {
            return Err(HttpError::misuse("trailers require a chunked request body"));
        }
        let mut rq = self.shared.lock_state();
        match rq.write_phase {
            WritePhase::Queued | WritePhase::Writing => {
                rq.request_trailer = trailer;
                Ok(())
            }
            _ => Err(HttpError::misuse("request body already finished")),
        }
    }

    /// The response head for this request.
    ///
    /// Parks until this request becomes the head-of-line reader and its
    /// headers arrive; interim 1xx responses are skipped. For a request
    /// without a declared body the write side is driven to completion
    /// first. The head is cached: later calls return it without I/O.
    pub async fn response(&self) -> crate::Result<ResponseHead> {
        {
            let rq = self.shared.lock_state();
            if let Some(response) = &rq.response {
                return Ok(response.clone());
            }
            if let Some(fault) = &rq.fault {
                return Err(fault.clone());
            }
        }

        self.ensure_request_done().await?;
        self.acquire_read_turn().await?;
        self.read_response_head().await
    }

    /// Whether the response carries a body, derived from the response
    /// status and the request method. Requires the response head to have
    /// been read.
    pub fn has_response_body(&self) -> crate::Result<bool> {
        let rq = self.shared.lock_state();
        match &rq.response {
            Some(_) => Ok(!rq.response_payload.is_empty()),
            None => Err(HttpError::misuse("response head not read yet")),
        }
    }

    /// The streaming response body reader. Reads the response head first
    /// if that has not happened yet. Fails with `ProtocolMisuse` when the
    /// response has no body or the body was already taken.
    pub async fn response_body(&self) -> crate::Result<ResponseBody> {
        self.response().await?;

        let payload = {
            let mut rq = self.shared.lock_state();
            if let Some(fault) = &rq.fault {
                return Err(fault.clone());
            }
            if rq.response_done || rq.response_payload.is_empty() {
                return Err(HttpError::misuse("response has no body"));
            }
            if rq.response_body_taken {
                return Err(HttpError::misuse("response body already taken"));
            }
            rq.response_body_taken = true;
            rq.response_payload
        };

        // the read slot is still ours, so this lock is uncontended
        let guard = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => return Err(HttpError::Aborted),
            guard = self.conn.reader.clone().lock_owned() => guard,
        };

        Ok(ResponseBody::new(guard, self.shared.clone(), self.conn.clone(), payload))
    }

    /// The response trailer. Only available once the response body has
    /// been consumed to EOF; empty for framings without trailers.
    pub fn response_trailer(&self) -> crate::Result<HeaderMap> {
        let rq = self.shared.lock_state();
        if let Some(fault) = &rq.fault {
            return Err(fault.clone());
        }
        if !rq.response_done {
            return Err(HttpError::misuse("response body not consumed yet"));
        }
        Ok(rq.response_trailer.clone().unwrap_or_default())
    }

    /// Completes the whole exchange, discarding the response body: drives
    /// the request side to completion (writing an empty body), reads the
    /// response head, and drains the response body and trailer.
    /// Idempotent once the exchange completed.
    pub async fn finish(&self) -> crate::Result<()> {
        self.ensure_request_done().await?;
        self.response().await?;

        let needs_drain = {
            let rq = self.shared.lock_state();
            if rq.response_done {
                return Ok(());
            }
            !rq.response_body_taken
        };
        if !needs_drain {
            return Err(HttpError::misuse("response body taken but not consumed"));
        }

        let mut body = self.response_body().await?;
        while let Some(frame) = body.frame().await {
            frame?;
        }
        log_trace!(request_logger(), "request #{} finished", self.shared.id);
        Ok(())
    }

    /// Cancels this request.
    ///
    /// Graceful (`abort == false`): a request that has not started writing
    /// is removed synchronously and later operations observe `Cancelled`.
    /// A request that is writing carries a flag that fails the body writer
    /// at its next boundary, which also poisons the write side so nothing
    /// further is pipelined. A request whose response is owed but unread
    /// poisons the read side, because HTTP/1.x cannot skip a response on
    /// the wire. Cancelling a completed request is a no-op.
    ///
    /// Abort (`abort == true`): force-fails the connection; every request
    /// on it observes `Aborted` and nothing is admitted again.
    pub fn cancel(&self, abort: bool) {
        if abort {
            self.conn.abort_from(&self.shared);
            return;
        }

        enum Action {
            None,
            WakeWriter(Option<Arc<RequestShared>>),
            WakeReaders(Vec<Arc<RequestShared>>),
        }

        let action = {
            let mut st = self.conn.lock_state();
            let mut rq = self.shared.lock_state();
            if rq.cancelled || rq.aborted || rq.fault.is_some() {
                return;
            }
            if rq.write_phase == WritePhase::Written && rq.response_done {
                // already completed
                return;
            }
            rq.cancelled = true;

            let action = match rq.write_phase {
                WritePhase::Queued => {
                    rq.fault = Some(HttpError::Cancelled);
                    drop(rq);
                    remove_from(&mut st.pending, &self.shared);
                    let next = if st.writing.is_none() { st.pending.front().cloned() } else { None };
                    Action::WakeWriter(next)
                }
                WritePhase::Writing => {
                    // flag checked at the next body-write boundary
                    drop(rq);
                    Action::None
                }
                WritePhase::Written if rq.response.is_none() => {
                    // the wire still owes this response; nothing can skip
                    // it, so the read side cannot be reused
                    rq.fault = Some(HttpError::Cancelled);
                    drop(rq);
                    remove_from(&mut st.waiting, &self.shared);
                    st.allow_new_requests = false;
                    if st.response_fault.is_none() {
                        st.response_fault = Some(HttpError::Cancelled);
                    }
                    Action::WakeReaders(st.waiting.iter().cloned().collect())
                }
                WritePhase::Written => {
                    // response in progress: the caller must still drain it
                    drop(rq);
                    Action::None
                }
                WritePhase::Failed => {
                    drop(rq);
                    Action::None
                }
            };
            st.check_invariants();
            action
        };

        log_verbose!(request_logger(), "request #{} cancelled", self.shared.id);
        match action {
            Action::None => {}
            Action::WakeWriter(next) => {
                if let Some(next) = next {
                    next.write_wake.wake();
                }
            }
            Action::WakeReaders(waiters) => {
                for waiter in waiters {
                    waiter.read_wake.wake();
                }
            }
        }
    }

    /// Parks until this request holds the write slot, then locks the
    /// write half of the transport.
    async fn acquire_write_turn(&self) -> crate::Result<OwnedMutexGuard<TransportWriter>> {
        loop {
            {
                let mut st = self.conn.lock_state();
                {
                    let rq = self.shared.lock_state();
                    if let Some(fault) = rq.fault.clone() {
                        drop(rq);
                        remove_from(&mut st.pending, &self.shared);
                        st.check_invariants();
                        return Err(fault);
                    }
                }
                if let Some(fault) = st.request_fault.clone() {
                    remove_from(&mut st.pending, &self.shared);
                    {
                        let mut rq = self.shared.lock_state();
                        rq.write_phase = WritePhase::Failed;
                        rq.fault = Some(fault.clone());
                    }
                    st.check_invariants();
                    return Err(fault);
                }

                let head_of_line = st
                    .pending
                    .front()
                    .map(|front| Arc::ptr_eq(front, &self.shared))
                    .unwrap_or(false);
                if head_of_line && st.writing.is_none() {
                    st.writing = Some(self.shared.id);
                    self.shared.lock_state().write_phase = WritePhase::Writing;
                    st.check_invariants();
                    break;
                }
            }
            self.shared.write_wake.wait().await;
        }

        log_trace!(request_logger(), "request #{} holds the write slot", self.shared.id);
        let guard = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => return Err(HttpError::Aborted),
            guard = self.conn.writer.clone().lock_owned() => guard,
        };
        Ok(guard)
    }

    /// Sends the serialized request head on the freshly granted write
    /// turn.
    async fn send_head(
        &self,
        mut guard: OwnedMutexGuard<TransportWriter>,
    ) -> crate::Result<OwnedMutexGuard<TransportWriter>> {
        let message = Message::Header((self.shared.head.clone(), self.shared.payload_size));
        let result = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => return Err(HttpError::Aborted),
            result = SinkExt::send(&mut *guard, message) => result,
        };

        match result {
            Ok(()) => {
                log_debug!(request_logger(), "request #{} head sent", self.shared.id);
                Ok(guard)
            }
            Err(e) => {
                let error = HttpError::from(e);
                self.conn.fail_write_side(Some(&self.shared), error.clone());
                Err(error)
            }
        }
    }

    /// Drives the write side to completion when possible without caller
    /// involvement: no-op when already written, sends head plus empty body
    /// for bodyless and chunked requests, and refuses when a declared body
    /// is unfinished.
    async fn ensure_request_done(&self) -> crate::Result<()> {
        let phase = {
            let rq = self.shared.lock_state();
            if let Some(fault) = &rq.fault {
                return Err(fault.clone());
            }
            rq.write_phase
        };

        match phase {
            WritePhase::Written => Ok(()),
            WritePhase::Writing => Err(HttpError::misuse("request body not finished")),
            WritePhase::Failed => {
                let rq = self.shared.lock_state();
                Err(rq.fault.clone().unwrap_or(HttpError::Aborted))
            }
            WritePhase::Queued => match self.shared.payload_size {
                PayloadSize::Empty => self.send_request_without_body().await,
                PayloadSize::Chunked => {
                    let body = self.request_body().await?;
                    body.finish().await
                }
                PayloadSize::Length(_) | PayloadSize::UntilClose => {
                    Err(HttpError::misuse("request declares a body that was never written"))
                }
            },
        }
    }

    async fn send_request_without_body(&self) -> crate::Result<()> {
        let guard = self.acquire_write_turn().await?;
        let mut guard = self.send_head(guard).await?;

        // an Empty payload encodes EOF to nothing, but sending it keeps
        // the encoder's head/payload alternation intact
        let eof = Message::Payload(PayloadItem::Eof(HeaderMap::new()));
        let result = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => return Err(HttpError::Aborted),
            result = SinkExt::send(&mut *guard, eof) => result,
        };
        if let Err(e) = result {
            let error = HttpError::from(e);
            self.conn.fail_write_side(Some(&self.shared), error.clone());
            return Err(error);
        }

        self.conn.finish_write_turn(&self.shared);
        drop(guard);
        Ok(())
    }

    /// Parks until this request is the head of the waiting-responses queue
    /// and the read slot is free, then claims the slot.
    async fn acquire_read_turn(&self) -> crate::Result<()> {
        loop {
            {
                let mut st = self.conn.lock_state();
                {
                    let rq = self.shared.lock_state();
                    if let Some(fault) = rq.fault.clone() {
                        drop(rq);
                        remove_from(&mut st.waiting, &self.shared);
                        let close_now = st.maybe_close_locked();
                        st.check_invariants();
                        drop(st);
                        if close_now {
                            self.conn.close_transport();
                        }
                        return Err(fault);
                    }
                }
                if let Some(fault) = st.response_fault.clone() {
                    remove_from(&mut st.waiting, &self.shared);
                    self.shared.lock_state().fault = Some(fault.clone());
                    let close_now = st.maybe_close_locked();
                    st.check_invariants();
                    drop(st);
                    if close_now {
                        self.conn.close_transport();
                    }
                    return Err(fault);
                }

                let head_of_line = st
                    .waiting
                    .front()
                    .map(|front| Arc::ptr_eq(front, &self.shared))
                    .unwrap_or(false);
                if head_of_line && st.reading.is_none() {
                    st.reading = Some(self.shared.id);
                    st.check_invariants();
                    break;
                }
            }
            self.shared.read_wake.wait().await;
        }

        log_trace!(request_logger(), "request #{} holds the read slot", self.shared.id);
        Ok(())
    }

    /// Reads response heads off the transport until a non-interim one
    /// arrives, then either retires immediately (bodyless response) or
    /// leaves the read turn open for the body reader.
    async fn read_response_head(&self) -> crate::Result<ResponseHead> {
        use futures::StreamExt;

        let mut guard = tokio::select! {
            biased;
            _ = self.conn.abort.cancelled() => return Err(HttpError::Aborted),
            guard = self.conn.reader.clone().lock_owned() => guard,
        };
        guard.decoder_mut().set_head_request(self.shared.head.is_head());

        loop {
            let item = tokio::select! {
                biased;
                _ = self.conn.abort.cancelled() => {
                    return Err(HttpError::Aborted);
                }
                item = StreamExt::next(&mut *guard) => item,
            };

            match item {
                None => {
                    // server went away before this response's head
                    let error = HttpError::ConnectionClosed;
                    self.conn.fail_read_side(Some(&self.shared), error.clone());
                    return Err(error);
                }
                Some(Err(decode_error)) => {
                    let error = HttpError::from(decode_error);
                    self.conn.fail_read_side(Some(&self.shared), error.clone());
                    return Err(error);
                }
                Some(Ok(Message::Header(head))) if head.is_informational() => {
                    log_debug!(
                        request_logger(),
                        "request #{} interim response {}",
                        self.shared.id,
                        head.status()
                    );
                    continue;
                }
                Some(Ok(Message::Header(head))) => {
                    let payload = head.payload_size(self.shared.head.is_head())?;
                    let close = head.close_after() || payload == PayloadSize::UntilClose;
                    log_debug!(
                        request_logger(),
                        "request #{} response {} close={close}",
                        self.shared.id,
                        head.status()
                    );
                    {
                        let mut rq = self.shared.lock_state();
                        rq.response = Some(head.clone());
                        rq.response_payload = payload;
                        rq.response_close = close;
                    }

                    if payload.is_empty() {
                        self.consume_immediate_eof(&mut guard).await?;
                        self.conn.finish_read_turn(&self.shared, close);
                    }
                    drop(guard);
                    return Ok(head);
                }
                Some(Ok(Message::Payload(_))) => {
                    let error = HttpError::framing("payload frame in place of a response head");
                    self.conn.fail_read_side(Some(&self.shared), error.clone());
                    return Err(error);
                }
            }
        }
    }

    /// A bodyless response still produces one EOF item from its payload
    /// decoder; consuming it here leaves the decoder ready for the next
    /// exchange.
    async fn consume_immediate_eof(
        &self,
        guard: &mut OwnedMutexGuard<crate::connection::TransportReader>,
    ) -> crate::Result<()> {
        use futures::StreamExt;

        match StreamExt::next(&mut **guard).await {
            Some(Ok(Message::Payload(PayloadItem::Eof(trailer)))) => {
                let mut rq = self.shared.lock_state();
                rq.response_trailer = Some(trailer);
                rq.response_done = true;
                Ok(())
            }
            Some(Err(decode_error)) => {
                let error = HttpError::from(decode_error);
                self.conn.fail_read_side(Some(&self.shared), error.clone());
                Err(error)
            }
            _ => {
                let error = HttpError::framing("bodyless response produced body bytes");
                self.conn.fail_read_side(Some(&self.shared), error.clone());
                Err(error)
            }
        }
    }
}

impl Drop for ClientRequest {
    fn drop(&mut self) {
        let completed = {
            let rq = self.shared.lock_state();
            (rq.write_phase == WritePhase::Written && rq.response_done)
                || rq.cancelled
                || rq.aborted
                || rq.fault.is_some()
        };
        if !completed {
            self.cancel(false);
        }
    }
}
