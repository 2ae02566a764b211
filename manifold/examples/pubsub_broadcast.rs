//! Broadcast pub/sub demo: one publisher, one subscriber receiving every
//! topic.
//!
//! Run with logging:
//! ```sh
//! RUST_LOG=debug cargo run --example pubsub_broadcast
//! ```

use std::thread;
use std::time::Duration;

use manifold::{Message, Publisher, Subscriber};

fn main() -> manifold::Result<()> {
    manifold::dev_tracing::init_tracing();

    let endpoint = "tcp://127.0.0.1:54371";
    let publisher = Publisher::bind(endpoint)?;

    let subscriber = Subscriber::broadcast(&[endpoint])?;
    subscriber.on_message(|handle, mut frames| {
        let topic = frames.pop_front().expect("topic frame");
        println!(
            "message {} topic={:?} ({} payload frames)",
            handle.received(),
            topic.as_slice(),
            frames.len()
        );
        handle.return_buffer(topic);
        while let Some(frame) = frames.pop_front() {
            handle.return_buffer(frame);
        }
    });
    assert!(subscriber.start());

    // Give the link a moment to come up
    thread::sleep(Duration::from_millis(500));

    for j in 0..16u8 {
        let frames = Message::new()
            .push(vec![j % 8])
            .push(format!("tick {j}").into_bytes())
            .into_frames();
        publisher.send(&frames)?;
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
