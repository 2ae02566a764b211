//! The socket-primitive contract consumed by the managed layer.
//!
//! The publisher and subscriber never talk to a transport directly; they
//! drive a [`FeedSocket`]. A backend provides one frame of send or one
//! whole message of receive per call, honors the timeouts and
//! high-water-marks in its [`SocketOptions`], and performs its own
//! reconnect handling (the managed layer deliberately has none).
//!
//! Backends in this workspace: the in-process fabric in
//! [`crate::inproc`] and the TCP wire in the `manifold` crate.

use std::collections::VecDeque;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::options::SocketOptions;
use crate::pool::{BufferPool, PooledBuf};

/// One received message: ordered frames, topic frame first, each backed by
/// a pooled buffer the consumer must return.
pub type FrameQueue = VecDeque<PooledBuf>;

/// A message-oriented, frame-based socket.
///
/// A socket is either bound (publish side) or connected (subscribe side),
/// decided by the first of `bind`/`connect` called on it. Calling an
/// operation that does not apply to the socket's role is a contract
/// violation and fails with `InvalidOperation`.
pub trait FeedSocket: Send {
    /// Bind to an endpoint and start accepting peers.
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Connect to a bound endpoint. May be called multiple times to fan
    /// in from several publishers; connecting an endpoint the socket is
    /// already connected to is a no-op.
    fn connect(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Subscribe to messages whose topic frame starts with `prefix`.
    /// The empty prefix subscribes to everything.
    fn subscribe(&mut self, prefix: &[u8]) -> Result<()>;

    /// Remove a previously added subscription prefix.
    fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()>;

    /// Send one frame. `more` marks a continuation frame; the frame
    /// without `more` completes the message and releases it to peers.
    ///
    /// With `dont_wait`, a send that cannot proceed immediately fails with
    /// `WouldBlock` instead of blocking up to the configured send timeout.
    fn send_frame(&mut self, frame: &[u8], more: bool, dont_wait: bool) -> Result<()>;

    /// Receive one whole message into buffers rented from `pool`.
    ///
    /// Blocks up to the configured receive timeout; `Ok(None)` means no
    /// message arrived in time. At most `max_frames` frames are returned;
    /// a longer message is truncated with a warning.
    fn recv_message(&mut self, pool: &BufferPool, max_frames: usize) -> Result<Option<FrameQueue>>;

    /// The configuration this socket was created with.
    fn options(&self) -> &SocketOptions;

    /// Tear the socket down. Further operations fail with `SocketClosed`.
    fn close(&mut self);
}

/// Copy raw frames into pooled buffers, honoring the frame-count bound.
///
/// Frames beyond `max_frames` are discarded with a warning; the bound
/// exists to cap pool rentals per receive.
pub fn queue_frames<'a, I>(pool: &BufferPool, frames: I, max_frames: usize) -> FrameQueue
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut queue = FrameQueue::new();
    let mut dropped = 0usize;
    for frame in frames {
        if queue.len() == max_frames {
            dropped += 1;
            continue;
        }
        queue.push_back(pool.rent_filled(frame));
    }
    if dropped > 0 {
        tracing::warn!(dropped, max_frames, "message truncated to frame bound");
    }
    queue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_frames_bounded() {
        let pool = BufferPool::new();
        let frames: Vec<Vec<u8>> = (0..5).map(|i| vec![i as u8]).collect();
        let queue = queue_frames(&pool, frames.iter().map(Vec::as_slice), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].as_slice(), &[0]);
        assert_eq!(queue[2].as_slice(), &[2]);
    }

    #[test]
    fn test_queue_frames_copies_payload() {
        let pool = BufferPool::new();
        let queue = queue_frames(&pool, [&b"topic"[..], &b"payload"[..]], 100);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].as_slice(), b"topic");
        assert_eq!(queue[1].as_slice(), b"payload");
    }
}
