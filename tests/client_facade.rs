//! Client facade tests
//!
//! These tests drive `H2Client` through a fake transport that records the
//! requests it is given and lets the test play the peer by feeding frame
//! events into the multiplexer:
//! - Handshake gating
//! - Correlation of concurrent exchanges
//! - Key reuse after completion, timeout and write failure
//! - Stream and connection errors

use bytes::Bytes;
use h2mux::http::h2::*;
use h2mux::http::Headers;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

struct FakeTransport {
    mux: Arc<Multiplexer>,
    next_stream_id: AtomicU32,
    written: Mutex<Vec<(StreamId, PutRequest)>>,
    write_timeouts: Mutex<Vec<Duration>>,
    auto_respond: AtomicBool,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
}

impl FakeTransport {
    fn new(mux: Arc<Multiplexer>) -> Self {
        FakeTransport {
            mux,
            next_stream_id: AtomicU32::new(1),
            written: Mutex::new(Vec::new()),
            write_timeouts: Mutex::new(Vec::new()),
            auto_respond: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            stall_writes: AtomicBool::new(false),
        }
    }

    fn written(&self) -> Vec<(StreamId, PutRequest)> {
        self.written.lock().unwrap().clone()
    }

    /// Wait until at least `n` requests were written
    fn wait_for_writes(&self, n: usize) -> Vec<(StreamId, PutRequest)> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let written = self.written();
            if written.len() >= n {
                return written;
            }
            assert!(Instant::now() < deadline, "only {} of {} requests written", written.len(), n);
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Transport for FakeTransport {
    fn write(&self, exchange: &ExchangeRef, request: &PutRequest, timeout: Duration) -> Result<StreamId> {
        self.write_timeouts.lock().unwrap().push(timeout);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::WriteFailure("connection reset by peer".to_string()));
        }
        if self.stall_writes.load(Ordering::SeqCst) {
            // A writer that never gets to the request
            thread::sleep(timeout);
            return Err(Error::Timeout);
        }

        let stream_id = self.next_stream_id.fetch_add(2, Ordering::SeqCst);
        self.mux.on_stream_opened(stream_id, exchange.clone());
        self.written.lock().unwrap().push((stream_id, request.clone()));

        if self.auto_respond.load(Ordering::SeqCst) {
            let path = request.key().path();
            respond(&self.mux, stream_id, "200", path.as_bytes());
        }
        Ok(stream_id)
    }
}

/// Play the peer: HEADERS, one DATA frame, then an empty DATA with END_STREAM
fn respond(mux: &Multiplexer, stream_id: StreamId, status: &str, body: &[u8]) {
    let mut headers = Headers::new();
    headers.insert(":status", status);
    headers.insert("server", "fake");
    mux.on_headers(stream_id, headers, false);
    if !body.is_empty() {
        mux.on_data(stream_id, Bytes::copy_from_slice(body), false);
    }
    mux.on_data(stream_id, Bytes::new(), true);
}

fn make_client(ready: bool) -> (Arc<H2Client<Arc<FakeTransport>>>, Arc<FakeTransport>) {
    let mux = Arc::new(Multiplexer::new());
    if ready {
        mux.on_settings_received();
        mux.on_settings_acknowledged();
    }

    let transport = Arc::new(FakeTransport::new(Arc::clone(&mux)));
    let config = ClientConfig::builder()
        .authority("localhost:9021")
        .build()
        .unwrap();
    let client = H2Client::new(config, mux, Arc::clone(&transport));
    (Arc::new(client), transport)
}

#[test]
fn test_end_to_end_put() {
    let (client, transport) = make_client(true);
    transport.auto_respond.store(true, Ordering::SeqCst);

    let payload = Bytes::from(vec![0xabu8; 1024]);
    let response = client
        .send("bucket1", "obj1", payload, 1024, Duration::from_secs(60))
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.is_success());
    assert_eq!(response.header("server"), Some("fake"));
    assert!(client.multiplexer().exchanges().is_empty());

    let written = transport.written();
    assert_eq!(written.len(), 1);
    let headers = written[0].1.headers();
    assert_eq!(headers.get(":method"), Some("PUT"));
    assert_eq!(headers.get(":path"), Some("/bucket1/obj1"));
    assert_eq!(headers.get(":authority"), Some("localhost:9021"));
    assert_eq!(headers.get("content-length"), Some("1024"));
    assert_eq!(headers.get("x-correlation-id"), Some("bucket1/obj1"));
    assert_eq!(written[0].1.body().len(), 1024);
}

#[test]
fn test_put_object_reports_status() {
    let (client, transport) = make_client(true);
    transport.auto_respond.store(true, Ordering::SeqCst);
    assert!(client.put_object("bucket1", "obj1", Bytes::from_static(b"abc"), 3));

    transport.auto_respond.store(false, Ordering::SeqCst);
    let waiter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.put_object("bucket1", "obj2", Bytes::from_static(b"abc"), 3))
    };
    let written = transport.wait_for_writes(2);
    respond(client.multiplexer(), written[1].0, "500", b"internal");
    assert!(!waiter.join().unwrap());
}

#[test]
fn test_send_before_handshake_times_out() {
    let (client, transport) = make_client(false);

    let start = Instant::now();
    let result = client.send("b", "k", Bytes::new(), 0, Duration::from_millis(100));
    assert!(matches!(result, Err(Error::HandshakeTimeout)));
    assert!(start.elapsed() >= Duration::from_millis(100));

    // Nothing registered, nothing written
    assert!(client.multiplexer().exchanges().is_empty());
    assert!(transport.written().is_empty());
}

#[test]
fn test_send_waits_for_handshake() {
    let (client, transport) = make_client(false);
    transport.auto_respond.store(true, Ordering::SeqCst);

    let signaller = {
        let mux = Arc::clone(client.multiplexer());
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            mux.on_settings_received();
            mux.on_settings_acknowledged();
        })
    };

    let response = client
        .send("b", "k", Bytes::from_static(b"x"), 1, Duration::from_secs(5))
        .unwrap();
    assert!(response.is_success());
    signaller.join().unwrap();
}

#[test]
fn test_concurrent_exchanges_are_not_cross_delivered() {
    const CALLERS: usize = 8;
    let (client, transport) = make_client(true);

    let callers: Vec<_> = (0..CALLERS)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || {
                let key = format!("obj{}", i);
                let response = client
                    .send("bucket", &key, Bytes::from(key.clone()), key.len(), Duration::from_secs(10))
                    .unwrap();
                (format!("/bucket/{}", key), response)
            })
        })
        .collect();

    // Answer in reverse order of arrival, echoing each request's path
    let mut written = transport.wait_for_writes(CALLERS);
    written.reverse();
    for (stream_id, request) in &written {
        respond(client.multiplexer(), *stream_id, "200", request.key().path().as_bytes());
    }

    for caller in callers {
        let (path, response) = caller.join().unwrap();
        assert_eq!(response.body_string().as_deref(), Some(path.as_str()));
    }
    assert!(client.multiplexer().exchanges().is_empty());
}

#[test]
fn test_duplicate_key_while_live() {
    let (client, transport) = make_client(true);

    let first = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)))
    };
    let written = transport.wait_for_writes(1);

    let second = client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5));
    assert!(matches!(second, Err(Error::DuplicateKey(_))));
    assert_eq!(transport.written().len(), 1);

    respond(client.multiplexer(), written[0].0, "200", b"");
    assert!(first.join().unwrap().is_ok());

    // Completed keys can be reused
    transport.auto_respond.store(true, Ordering::SeqCst);
    assert!(client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)).is_ok());
}

#[test]
fn test_timeout_frees_key() {
    let (client, transport) = make_client(true);

    let start = Instant::now();
    let result = client.send("b", "k", Bytes::new(), 0, Duration::from_millis(100));
    assert!(matches!(result, Err(Error::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(client.multiplexer().exchanges().is_empty());

    transport.auto_respond.store(true, Ordering::SeqCst);
    let response = client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)).unwrap();
    assert!(response.is_success());
}

#[test]
fn test_late_response_does_not_complete_reused_key() {
    let (client, transport) = make_client(true);

    let result = client.send("b", "k", Bytes::new(), 0, Duration::from_millis(50));
    assert!(matches!(result, Err(Error::Timeout)));
    let stale_stream = transport.written()[0].0;

    let second = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)))
    };
    let written = transport.wait_for_writes(2);
    let fresh_stream = written[1].0;
    assert_ne!(stale_stream, fresh_stream);

    // The old stream's response finally shows up
    respond(client.multiplexer(), stale_stream, "200", b"stale");
    let key = CorrelationKey::new("b", "k");
    assert_eq!(
        client.multiplexer().exchanges().status(&key),
        Some(ExchangeStatus::Pending)
    );

    respond(client.multiplexer(), fresh_stream, "200", b"fresh");
    let response = second.join().unwrap().unwrap();
    assert_eq!(response.body_string().as_deref(), Some("fresh"));
    assert_eq!(response.stream_id(), fresh_stream);
}

#[test]
fn test_write_failure_propagates_and_frees_key() {
    let (client, transport) = make_client(true);
    transport.fail_writes.store(true, Ordering::SeqCst);

    let result = client.send("b", "k", Bytes::from_static(b"data"), 4, Duration::from_secs(5));
    assert!(matches!(result, Err(Error::WriteFailure(_))));
    assert!(client.multiplexer().exchanges().is_empty());

    transport.fail_writes.store(false, Ordering::SeqCst);
    transport.auto_respond.store(true, Ordering::SeqCst);
    assert!(client.send("b", "k", Bytes::from_static(b"data"), 4, Duration::from_secs(5)).is_ok());
}

#[test]
fn test_content_length_mismatch_is_rejected_early() {
    let (client, transport) = make_client(true);

    let result = client.send("b", "k", Bytes::from_static(b"data"), 10, Duration::from_secs(5));
    assert!(matches!(result, Err(Error::InvalidRequest(_))));
    assert!(transport.written().is_empty());
    assert!(client.multiplexer().exchanges().is_empty());
}

#[test]
fn test_stream_reset_fails_exchange() {
    let (client, transport) = make_client(true);

    let waiter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)))
    };
    let written = transport.wait_for_writes(1);
    let stream_id = written[0].0;

    client.multiplexer().on_stream_error(
        stream_id,
        Error::StreamError {
            stream_id,
            code: ErrorCode::RefusedStream,
        },
    );

    match waiter.join().unwrap() {
        Err(Error::StreamError { stream_id: id, code }) => {
            assert_eq!(id, stream_id);
            assert_eq!(code, ErrorCode::RefusedStream);
        }
        other => panic!("expected stream error, got {:?}", other),
    }
}

#[test]
fn test_connection_loss_fails_pending_exchanges() {
    let (client, transport) = make_client(true);

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.send("b", &format!("k{}", i), Bytes::new(), 0, Duration::from_secs(5)))
        })
        .collect();
    transport.wait_for_writes(3);

    client.multiplexer().on_connection_closed();

    for waiter in waiters {
        assert!(matches!(waiter.join().unwrap(), Err(Error::ConnectionClosed)));
    }
}

#[test]
fn test_connection_loss_releases_handshake_waiters() {
    let (client, _transport) = make_client(false);

    let waiter = {
        let client = Arc::clone(&client);
        thread::spawn(move || client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)))
    };
    thread::sleep(Duration::from_millis(20));
    client.multiplexer().on_connection_closed();

    assert!(matches!(waiter.join().unwrap(), Err(Error::ConnectionClosed)));
}

#[test]
fn test_timed_out_stream_is_handed_back() {
    let (client, transport) = make_client(true);

    let result = client.send("b", "k", Bytes::new(), 0, Duration::from_millis(50));
    assert!(matches!(result, Err(Error::Timeout)));
    let stream_id = transport.written()[0].0;

    // The transport collects the stream to reset it
    assert_eq!(client.multiplexer().take_abandoned(), vec![stream_id]);
    assert!(client.multiplexer().take_abandoned().is_empty());

    // A response after the release reaches nobody
    respond(client.multiplexer(), stream_id, "200", b"late");
    assert!(client.multiplexer().exchanges().is_empty());
}

#[test]
fn test_completed_stream_is_not_handed_back() {
    let (client, transport) = make_client(true);
    transport.auto_respond.store(true, Ordering::SeqCst);

    assert!(client.send("b", "k", Bytes::new(), 0, Duration::from_secs(5)).is_ok());
    assert!(client.multiplexer().take_abandoned().is_empty());
}

#[test]
fn test_write_is_bounded_by_the_remaining_deadline() {
    let (client, transport) = make_client(true);
    transport.auto_respond.store(true, Ordering::SeqCst);

    let timeout = Duration::from_millis(500);
    assert!(client.send("b", "k", Bytes::new(), 0, timeout).is_ok());

    let given = transport.write_timeouts.lock().unwrap().clone();
    assert_eq!(given.len(), 1);
    assert!(given[0] <= timeout);
}

#[test]
fn test_stalled_write_returns_at_the_deadline() {
    let (client, transport) = make_client(true);
    transport.stall_writes.store(true, Ordering::SeqCst);

    let start = Instant::now();
    let result = client.send("b", "k", Bytes::from_static(b"data"), 4, Duration::from_millis(100));
    assert!(matches!(result, Err(Error::Timeout)));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(client.multiplexer().exchanges().is_empty());
}
