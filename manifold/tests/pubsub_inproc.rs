//! Managed publisher/subscriber behavior over the in-process backend:
//! filtering, broadcast, stop/start, handler isolation, and configuration
//! errors, all deterministic and network-free.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;

use manifold::{EndpointError, ManifoldError, Publisher, SocketOptions, Subscriber};

type Messages = Arc<Mutex<Vec<Vec<Vec<u8>>>>>;

/// Register a handler that copies every message out and returns the
/// buffers, exposing the log for assertions.
fn collect(subscriber: &Subscriber) -> Messages {
    let messages: Messages = Arc::new(Mutex::new(Vec::new()));
    let sink = messages.clone();
    subscriber.on_message(move |handle, mut frames| {
        let mut msg = Vec::new();
        while let Some(buf) = frames.pop_front() {
            msg.push(buf.as_slice().to_vec());
            handle.return_buffer(buf);
        }
        sink.lock().push(msg);
    });
    messages
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    cond()
}

/// Short receive timeout keeps the read loop responsive in tests.
fn fast_opts() -> SocketOptions {
    SocketOptions::default().with_recv_timeout(Duration::from_millis(100))
}

fn msg(topic: u8, payload: &[u8]) -> Vec<Bytes> {
    vec![
        Bytes::copy_from_slice(&[topic]),
        Bytes::copy_from_slice(payload),
    ]
}

#[test]
fn test_topic_filter_delivers_matching_only() {
    let ep = "inproc://filter-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[0x03], fast_opts()).unwrap();
    let messages = collect(&subscriber);
    assert!(subscriber.start());

    publisher.send(&msg(0x04, b"skipped")).unwrap();
    publisher.send(&msg(0x03, b"delivered")).unwrap();
    publisher.send(&msg(0x05, b"skipped too")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 1));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(subscriber.received(), 1, "non-matching topics must not count");

    let messages = messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0][0], vec![0x03]);
    assert_eq!(messages[0][1], b"delivered");
}

#[test]
fn test_broadcast_receives_every_topic() {
    let ep = "inproc://broadcast-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[], fast_opts()).unwrap();
    let messages = collect(&subscriber);
    assert!(subscriber.start());

    for j in 0..16u8 {
        publisher.send(&msg(j % 8, &[j])).unwrap();
    }

    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 16));
    assert_eq!(publisher.published(), 16);

    let observed: std::collections::BTreeSet<u8> =
        messages.lock().iter().map(|m| m[0][0]).collect();
    assert_eq!(observed, (0..8u8).collect(), "no topic byte missing");
}

#[test]
fn test_stop_start_resumes_and_keeps_counters() {
    let ep = "inproc://stop-start-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[], fast_opts()).unwrap();
    let _messages = collect(&subscriber);

    assert!(subscriber.start());
    publisher.send(&msg(1, b"one")).unwrap();
    publisher.send(&msg(2, b"two")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 2));

    subscriber.stop();
    // Messages published while stopped are lost (best-effort delivery)
    publisher.send(&msg(3, b"missed")).unwrap();

    assert!(subscriber.start(), "restart without reconstruction");
    assert_eq!(subscriber.received(), 2, "counter survives stop/start");

    for j in 0..3u8 {
        publisher.send(&msg(4 + j, b"after-restart")).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 5));
    assert_eq!(publisher.published(), 6);
}

#[test]
fn test_handler_panic_does_not_kill_read_loop() {
    let ep = "inproc://panic-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[], fast_opts()).unwrap();
    subscriber.on_message(|_handle, _frames| panic!("handler bug"));
    assert!(subscriber.start());

    for j in 0..3u8 {
        publisher.send(&msg(j, b"boom")).unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(5), || subscriber.received() == 3),
        "loop must survive a panicking handler"
    );
}

#[test]
fn test_start_twice_delivers_once() {
    let ep = "inproc://double-start-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[], fast_opts()).unwrap();
    let messages = collect(&subscriber);

    assert!(subscriber.start());
    assert!(subscriber.start(), "start is idempotent");

    publisher.send(&msg(1, b"once")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || subscriber.received() >= 1));
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(subscriber.received(), 1, "no duplicate delivery");
    assert_eq!(messages.lock().len(), 1);
}

#[test]
fn test_fan_in_from_two_publishers() {
    let ep_a = "inproc://fan-in-a";
    let ep_b = "inproc://fan-in-b";
    let pub_a = Publisher::bind_with_options(ep_a, fast_opts()).unwrap();
    let pub_b = Publisher::bind_with_options(ep_b, fast_opts()).unwrap();

    let subscriber = Subscriber::with_options(&[ep_a, ep_b], &[], fast_opts()).unwrap();
    let messages = collect(&subscriber);
    assert!(subscriber.start());

    pub_a.send(&msg(1, b"from-a")).unwrap();
    pub_b.send(&msg(2, b"from-b")).unwrap();

    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 2));
    let payloads: std::collections::BTreeSet<Vec<u8>> =
        messages.lock().iter().map(|m| m[1].clone()).collect();
    assert!(payloads.contains(&b"from-a".to_vec()));
    assert!(payloads.contains(&b"from-b".to_vec()));
}

#[test]
fn test_unregistered_handler_still_counts() {
    let ep = "inproc://no-handler-test";
    let publisher = Publisher::bind_with_options(ep, fast_opts()).unwrap();
    let subscriber = Subscriber::with_options(&[ep], &[], fast_opts()).unwrap();
    assert!(subscriber.start());

    publisher.send(&msg(1, b"unobserved")).unwrap();
    assert!(wait_until(Duration::from_secs(5), || subscriber.received() == 1));
}

#[test]
fn test_configuration_errors() {
    assert!(matches!(
        Publisher::bind(""),
        Err(ManifoldError::Endpoint(EndpointError::Blank))
    ));
    assert!(matches!(
        Publisher::bind("   "),
        Err(ManifoldError::Endpoint(EndpointError::Blank))
    ));
    assert!(matches!(
        Publisher::bind("udp://127.0.0.1:1"),
        Err(ManifoldError::Endpoint(EndpointError::InvalidScheme(_)))
    ));

    assert!(matches!(
        Subscriber::broadcast(&[]),
        Err(ManifoldError::Endpoint(EndpointError::NoEndpoints))
    ));
    assert!(matches!(
        Subscriber::broadcast(&["inproc://a", "tcp://127.0.0.1:1"]),
        Err(ManifoldError::Endpoint(EndpointError::MixedSchemes))
    ));
}
