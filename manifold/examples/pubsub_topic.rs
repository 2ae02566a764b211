//! Topic-filtered pub/sub demo: the subscriber only sees messages whose
//! topic frame starts with its prefix.
//!
//! Run with logging:
//! ```sh
//! RUST_LOG=debug cargo run --example pubsub_topic
//! ```

use std::thread;
use std::time::Duration;

use manifold::{Bytes, Publisher, Subscriber};

fn main() -> manifold::Result<()> {
    manifold::dev_tracing::init_tracing();

    let endpoint = "tcp://127.0.0.1:54372";
    let publisher = Publisher::bind(endpoint)?;

    let subscriber = Subscriber::with_topic(&[endpoint], b"quotes.")?;
    subscriber.on_message(|handle, mut frames| {
        while let Some(frame) = frames.pop_front() {
            println!("frame: {}", String::from_utf8_lossy(frame.as_slice()));
            handle.return_buffer(frame);
        }
    });
    assert!(subscriber.start());

    thread::sleep(Duration::from_millis(500));

    // Only the quotes.* messages reach the subscriber
    for (topic, body) in [
        ("quotes.BTC", "58297.5"),
        ("trades.BTC", "sell 3960"),
        ("quotes.ETH", "3012.8"),
    ] {
        publisher.send(&[
            Bytes::copy_from_slice(topic.as_bytes()),
            Bytes::copy_from_slice(body.as_bytes()),
        ])?;
    }

    thread::sleep(Duration::from_secs(1));
    println!(
        "published={} received={}",
        publisher.published(),
        subscriber.received()
    );

    subscriber.stop();
    Ok(())
}
