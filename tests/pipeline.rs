use std::sync::Mutex;
use std::time::Duration;

use http::header::HeaderValue;
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

use pipeline_http::{ClientConnection, HttpError, RequestHead};

fn connection() -> (ClientConnection, DuplexStream) {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    (ClientConnection::new(client_io), server_io)
}

fn get(path: &'static str) -> RequestHead {
    RequestHead::get(Uri::from_static(path))
}

fn chunked_post(path: &'static str) -> RequestHead {
    RequestHead::new(Method::POST, Uri::from_static(path)).with_header(
        http::header::TRANSFER_ENCODING,
        HeaderValue::from_static("chunked"),
    )
}

fn sized_post(path: &'static str, length: &'static str) -> RequestHead {
    RequestHead::new(Method::POST, Uri::from_static(path))
        .with_header(http::header::CONTENT_LENGTH, HeaderValue::from_static(length))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn position(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Reads from the peer until `needle` has appeared in the accumulated
/// bytes, returning everything read so far.
async fn read_until(server: &mut DuplexStream, needle: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    let mut buf = [0u8; 2048];
    while !contains(&data, needle) {
        let n = timeout(Duration::from_secs(5), server.read(&mut buf))
            .await
            .expect("timed out waiting for request bytes")
            .unwrap();
        assert!(n > 0, "peer closed while waiting for request bytes");
        data.extend_from_slice(&buf[..n]);
    }
    data
}

#[tokio::test]
async fn three_pipelined_gets() {
    let (conn, mut server) = connection();
    let a = conn.request(get("/a")).unwrap();
    let b = conn.request(get("/b")).unwrap();
    let c = conn.request(get("/c")).unwrap();

    let server_task = tokio::spawn(async move {
        let data = read_until(&mut server, b"GET /c HTTP/1.1\r\n\r\n").await;

        // request bytes hit the wire contiguously, in submission order
        let pos_a = position(&data, b"GET /a").unwrap();
        let pos_b = position(&data, b"GET /b").unwrap();
        let pos_c = position(&data, b"GET /c").unwrap();
        assert!(pos_a < pos_b && pos_b < pos_c);

        server
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-length: 1\r\n\r\nA\
                  HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nBB\
                  HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nCCC",
            )
            .await
            .unwrap();
        server
    });

    async fn fetch(
        request: &pipeline_http::ClientRequest,
        tag: char,
        order: &Mutex<Vec<char>>,
    ) -> bytes::Bytes {
        let head = request.response().await.unwrap();
        assert_eq!(head.status(), StatusCode::OK);
        let body = request.response_body().await.unwrap();
        let bytes = body.collect().await.unwrap().to_bytes();
        order.lock().unwrap().push(tag);
        bytes
    }

    let order = Mutex::new(Vec::new());
    let (body_a, body_b, body_c) = timeout(
        Duration::from_secs(5),
        futures::future::join3(
            fetch(&a, 'a', &order),
            fetch(&b, 'b', &order),
            fetch(&c, 'c', &order),
        ),
    )
    .await
    .unwrap();

    assert_eq!(&body_a[..], b"A");
    assert_eq!(&body_b[..], b"BB");
    assert_eq!(&body_c[..], b"CCC");

    // responses complete in submission order
    assert_eq!(*order.lock().unwrap(), vec!['a', 'b', 'c']);
    assert!(conn.accepts_requests());

    server_task.await.unwrap();
}

#[tokio::test]
async fn abort_fails_every_request() {
    let (conn, mut server) = connection();
    let a = conn.request(get("/a")).unwrap();
    let b = conn.request(get("/b")).unwrap();
    let c = conn.request(get("/c")).unwrap();

    let (hold_tx, hold_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /a HTTP/1.1\r\n\r\n").await;
        // two of five body bytes, then silence
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nAA")
            .await
            .unwrap();
        let _ = hold_rx.await;
    });

    let head = a.response().await.unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    let mut body = a.response_body().await.unwrap();
    let first = body.frame().await.unwrap().unwrap();
    assert_eq!(&first.into_data().unwrap()[..], b"AA");

    a.cancel(true);

    let error = body.frame().await.unwrap().unwrap_err();
    assert!(matches!(error, HttpError::Aborted), "got {error:?}");

    let error = b.response().await.unwrap_err();
    assert!(matches!(error, HttpError::Aborted), "got {error:?}");
    let error = c.response().await.unwrap_err();
    assert!(matches!(error, HttpError::Aborted), "got {error:?}");

    assert!(!conn.accepts_requests());
    let error = conn.request(get("/later")).unwrap_err();
    assert!(matches!(error, HttpError::ConnectionClosed), "got {error:?}");

    drop(hold_tx);
    server_task.await.unwrap();
}

#[tokio::test]
async fn server_close_after_first_response() {
    let (conn, mut server) = connection();
    let a = conn.request(get("/a")).unwrap();
    let b = conn.request(get("/b")).unwrap();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /b HTTP/1.1\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nconnection: close\r\ncontent-length: 1\r\n\r\nA")
            .await
            .unwrap();
        // once the close directive drains, the client shuts the
        // transport down and this read reaches EOF
        let mut buf = [0u8; 256];
        loop {
            let n = timeout(Duration::from_secs(5), server.read(&mut buf))
                .await
                .expect("timed out waiting for the client to close")
                .unwrap();
            if n == 0 {
                break;
            }
        }
    });

    let (result_a, result_b) = timeout(
        Duration::from_secs(5),
        futures::future::join(
            async {
                let head = a.response().await?;
                assert_eq!(head.status(), StatusCode::OK);
                let body = a.response_body().await?;
                Ok::<_, HttpError>(body.collect().await?.to_bytes())
            },
            async { b.response().await },
        ),
    )
    .await
    .unwrap();

    assert_eq!(&result_a.unwrap()[..], b"A");
    let error = result_b.unwrap_err();
    assert!(matches!(error, HttpError::ConnectionClosed), "got {error:?}");

    assert!(!conn.accepts_requests());
    let error = conn.request(get("/later")).unwrap_err();
    assert!(matches!(error, HttpError::ConnectionClosed), "got {error:?}");

    server_task.await.unwrap();
}

#[tokio::test]
async fn chunked_request_with_trailer() {
    let (conn, mut server) = connection();
    let request = conn.request(chunked_post("/upload")).unwrap();

    let server_task = tokio::spawn(async move {
        let data = read_until(&mut server, b"0\r\nx-checksum: abc\r\n\r\n").await;
        assert_eq!(
            &data[..],
            b"POST /upload HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n\
              2\r\nhe\r\n3\r\nllo\r\n0\r\nx-checksum: abc\r\n\r\n"
                .as_slice()
        );
        server
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        server
    });

    let mut body = request.request_body().await.unwrap();
    body.write("he").await.unwrap();
    body.write("llo").await.unwrap();

    let mut trailer = HeaderMap::new();
    trailer.insert("x-checksum", HeaderValue::from_static("abc"));
    request.set_request_trailer(trailer).unwrap();

    body.finish().await.unwrap();

    let head = request.response().await.unwrap();
    assert_eq!(head.status(), StatusCode::NO_CONTENT);
    assert!(!request.has_response_body().unwrap());
    request.finish().await.unwrap();

    server_task.await.unwrap();
}

#[tokio::test]
async fn short_write_poisons_the_connection() {
    let (conn, _server) = connection();
    let request = conn.request(sized_post("/upload", "10")).unwrap();
    let follower = conn.request(get("/next")).unwrap();

    let mut body = request.request_body().await.unwrap();
    body.write("partial").await.unwrap();

    let error = body.finish().await.unwrap_err();
    assert!(
        matches!(error, HttpError::ShortWrite { expected: 10, written: 7 }),
        "got {error:?}"
    );

    // the write-side fault is sticky for everything behind it
    let error = follower.response().await.unwrap_err();
    assert!(matches!(error, HttpError::ShortWrite { .. }), "got {error:?}");

    assert!(!conn.accepts_requests());
    let error = conn.request(get("/later")).unwrap_err();
    assert!(matches!(error, HttpError::ConnectionClosed), "got {error:?}");
}

#[tokio::test]
async fn close_directive_disables_admission_immediately() {
    let (conn, mut server) = connection();
    let head = get("/last")
        .with_header(http::header::CONNECTION, HeaderValue::from_static("close"));
    let request = conn.request(head).unwrap();

    assert!(!conn.accepts_requests());
    let error = conn.request(get("/after")).unwrap_err();
    assert!(matches!(error, HttpError::ConnectionClosed), "got {error:?}");

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        server
    });

    // the admitted request still completes normally
    request.finish().await.unwrap();
    assert_eq!(request.response().await.unwrap().status(), StatusCode::OK);

    server_task.await.unwrap();
}

#[tokio::test]
async fn zero_length_chunked_body_emits_one_zero_chunk() {
    let (conn, mut server) = connection();
    let request = conn.request(chunked_post("/empty")).unwrap();

    let server_task = tokio::spawn(async move {
        let data = read_until(&mut server, b"\r\n\r\n0\r\n\r\n").await;
        assert_eq!(
            &data[..],
            b"POST /empty HTTP/1.1\r\ntransfer-encoding: chunked\r\n\r\n0\r\n\r\n".as_slice()
        );
        server
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        server
    });

    let body = request.request_body().await.unwrap();
    body.finish().await.unwrap();
    request.finish().await.unwrap();

    server_task.await.unwrap();
}

#[tokio::test]
async fn finish_drives_a_chunked_request_end_to_end() {
    let (conn, mut server) = connection();
    let request = conn.request(chunked_post("/empty")).unwrap();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"0\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 204 No Content\r\n\r\n")
            .await
            .unwrap();
        server
    });

    request.finish().await.unwrap();
    assert_eq!(request.response().await.unwrap().status(), StatusCode::NO_CONTENT);

    server_task.await.unwrap();
}

#[tokio::test]
async fn no_content_response_and_connection_reuse() {
    let (conn, mut server) = connection();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /first HTTP/1.1\r\n\r\n").await;
        server.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        read_until(&mut server, b"GET /second HTTP/1.1\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
            .await
            .unwrap();
        server
    });

    let first = conn.request(get("/first")).unwrap();
    let head = first.response().await.unwrap();
    assert_eq!(head.status(), StatusCode::NO_CONTENT);
    assert!(!first.has_response_body().unwrap());

    let error = first.response_body().await.unwrap_err();
    assert!(matches!(error, HttpError::ProtocolMisuse { .. }), "got {error:?}");

    first.finish().await.unwrap();

    // 204 keeps the connection reusable
    assert!(conn.accepts_requests());
    let second = conn.request(get("/second")).unwrap();
    let body = second.response_body().await.unwrap();
    assert_eq!(&body.collect().await.unwrap().to_bytes()[..], b"ok");

    server_task.await.unwrap();
}

#[tokio::test]
async fn interim_responses_are_skipped() {
    let (conn, mut server) = connection();
    let request = conn.request(sized_post("/upload", "2")).unwrap();

    let server_task = tokio::spawn(async move {
        // head and body may arrive together; wait for the body bytes
        read_until(&mut server, b"\r\n\r\nok").await;
        server.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        server
    });

    let mut body = request.request_body().await.unwrap();
    body.write("ok").await.unwrap();
    body.finish().await.unwrap();

    let head = request.response().await.unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    request.finish().await.unwrap();

    server_task.await.unwrap();
}

#[tokio::test]
async fn graceful_cancel_of_queued_request() {
    let (conn, mut server) = connection();
    let a = conn.request(get("/a")).unwrap();
    let b = conn.request(get("/b")).unwrap();

    a.cancel(false);

    let error = a.response().await.unwrap_err();
    assert!(matches!(error, HttpError::Cancelled), "got {error:?}");

    let server_task = tokio::spawn(async move {
        let data = read_until(&mut server, b"GET /b HTTP/1.1\r\n\r\n").await;
        // the cancelled request never reached the wire
        assert!(!contains(&data, b"GET /a"));
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .await
            .unwrap();
        server
    });

    b.finish().await.unwrap();
    assert_eq!(b.response().await.unwrap().status(), StatusCode::OK);

    // cancelling an already-cancelled request is a no-op
    a.cancel(false);

    server_task.await.unwrap();
}

#[tokio::test]
async fn finish_is_idempotent_and_cancel_after_completion_is_a_noop() {
    let (conn, mut server) = connection();
    let request = conn.request(get("/one")).unwrap();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /one HTTP/1.1\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 1\r\n\r\nX")
            .await
            .unwrap();
        server
    });

    request.finish().await.unwrap();
    request.finish().await.unwrap();

    request.cancel(false);
    assert_eq!(request.response().await.unwrap().status(), StatusCode::OK);
    assert!(conn.accepts_requests());

    server_task.await.unwrap();
}

#[tokio::test]
async fn response_trailer_after_chunked_body() {
    let (conn, mut server) = connection();
    let request = conn.request(get("/t")).unwrap();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /t HTTP/1.1\r\n\r\n").await;
        server
            .write_all(
                b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n\
                  3\r\nabc\r\n0\r\nx-digest: xyz\r\n\r\n",
            )
            .await
            .unwrap();
        server
    });

    request.response().await.unwrap();

    // the trailer is not available before the body has been consumed
    let error = request.response_trailer().unwrap_err();
    assert!(matches!(error, HttpError::ProtocolMisuse { .. }), "got {error:?}");

    let body = request.response_body().await.unwrap();
    let collected = body.collect().await.unwrap();
    assert_eq!(
        collected.trailers().and_then(|t| t.get("x-digest")),
        Some(&HeaderValue::from_static("xyz"))
    );
    assert_eq!(&collected.to_bytes()[..], b"abc");

    let trailer = request.response_trailer().unwrap();
    assert_eq!(trailer.get("x-digest"), Some(&HeaderValue::from_static("xyz")));

    server_task.await.unwrap();
}

#[tokio::test]
async fn dropping_a_response_body_mid_stream_poisons_the_read_side() {
    let (conn, mut server) = connection();
    let a = conn.request(get("/a")).unwrap();
    let b = conn.request(get("/b")).unwrap();

    let (hold_tx, hold_rx) = oneshot::channel::<()>();
    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /a HTTP/1.1\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nAB")
            .await
            .unwrap();
        let _ = hold_rx.await;
    });

    a.response().await.unwrap();
    let mut body = a.response_body().await.unwrap();
    let first = body.frame().await.unwrap().unwrap();
    assert_eq!(&first.into_data().unwrap()[..], b"AB");

    drop(body);

    let error = b.response().await.unwrap_err();
    assert!(matches!(error, HttpError::ProtocolMisuse { .. }), "got {error:?}");
    assert!(!conn.accepts_requests());

    drop(hold_tx);
    server_task.await.unwrap();
}

#[tokio::test]
async fn close_delimited_response_body() {
    let (conn, mut server) = connection();
    let request = conn.request(get("/stream")).unwrap();

    let server_task = tokio::spawn(async move {
        read_until(&mut server, b"GET /stream HTTP/1.1\r\n\r\n").await;
        // neither content-length nor chunked: the body runs until close
        server
            .write_all(b"HTTP/1.1 200 OK\r\n\r\nstreamed until close")
            .await
            .unwrap();
    });

    let head = request.response().await.unwrap();
    assert_eq!(head.status(), StatusCode::OK);
    assert!(request.has_response_body().unwrap());

    let body = request.response_body().await.unwrap();
    assert_eq!(&body.collect().await.unwrap().to_bytes()[..], b"streamed until close");

    // close-delimited framing implies the connection is done
    assert!(!conn.accepts_requests());

    server_task.await.unwrap();
}

#[tokio::test]
async fn conflicting_body_framing_is_rejected_at_admission() {
    let (conn, _server) = connection();
    let head = sized_post("/x", "4").with_header(
        http::header::TRANSFER_ENCODING,
        HeaderValue::from_static("chunked"),
    );
    let error = conn.request(head).unwrap_err();
    assert!(matches!(error, HttpError::ProtocolMisuse { .. }), "got {error:?}");
}
