//! Managed publish side: one bound socket, serialization-atomic
//! multi-frame send, whole-message publish counter.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use manifold_core::endpoint::Endpoint;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::SocketOptions;
use manifold_core::socket::FeedSocket;

use crate::open_socket;

/// A publisher bound to one endpoint.
///
/// `send` is *serialization-atomic*: one lock is held across the whole
/// multi-frame send, so concurrent callers never interleave frames on the
/// wire. It is **not** transactionally atomic: if frame `k` of `n` fails,
/// frames `0..k` have already left the socket and are not recalled. The
/// call reports failure, the publish counter does not move, and the caller
/// decides whether to resend.
///
/// # Examples
///
/// ```no_run
/// use manifold::{Publisher, Message};
///
/// # fn main() -> manifold_core::error::Result<()> {
/// let publisher = Publisher::bind("tcp://*:54321")?;
/// let frames = Message::new().push_str("quotes").push_str("42.5").into_frames();
/// publisher.send(&frames)?;
/// assert_eq!(publisher.published(), 1);
/// # Ok(())
/// # }
/// ```
pub struct Publisher {
    endpoint: Endpoint,
    socket: Mutex<Option<Box<dyn FeedSocket>>>,
    /// Whole messages successfully sent (one per `send`, not per frame)
    published: AtomicU64,
}

impl Publisher {
    /// Bind a publisher with the default socket configuration.
    ///
    /// Fails with an endpoint error if `endpoint` is blank or malformed,
    /// and with an IO error if the bind itself fails. The returned object
    /// is never partially usable.
    pub fn bind(endpoint: &str) -> Result<Self> {
        Self::bind_with_options(endpoint, SocketOptions::default())
    }

    /// Bind a publisher with explicit socket configuration.
    pub fn bind_with_options(endpoint: &str, options: SocketOptions) -> Result<Self> {
        let endpoint = Endpoint::parse(endpoint)?;
        let socket = open_socket(&endpoint, &options);
        Self::from_socket(endpoint, socket)
    }

    /// Bind a publisher over a caller-supplied transport backend.
    pub fn with_socket(endpoint: &str, socket: Box<dyn FeedSocket>) -> Result<Self> {
        let endpoint = Endpoint::parse(endpoint)?;
        Self::from_socket(endpoint, socket)
    }

    fn from_socket(endpoint: Endpoint, mut socket: Box<dyn FeedSocket>) -> Result<Self> {
        socket.bind(&endpoint)?;
        debug!(%endpoint, "publisher bound");
        Ok(Self {
            endpoint,
            socket: Mutex::new(Some(socket)),
            published: AtomicU64::new(0),
        })
    }

    /// The endpoint this publisher is bound to.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whole messages successfully sent, however many frames each had.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Send one multi-frame message.
    ///
    /// Every frame is sent with the don't-wait flag; all but the last
    /// carry the continuation mark. The first frame error aborts the send:
    /// already-sent frames stay sent, the error is returned, and the
    /// counter is untouched.
    pub fn send(&self, frames: &[Bytes]) -> Result<()> {
        if frames.is_empty() {
            return Err(ManifoldError::EmptyMessage);
        }
        let mut guard = self.socket.lock();
        let socket = guard.as_mut().ok_or(ManifoldError::SocketClosed)?;
        let last = frames.len() - 1;
        for (j, frame) in frames.iter().enumerate() {
            socket.send_frame(frame, j < last, true)?;
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a single-frame message.
    pub fn send_one(&self, frame: &[u8]) -> Result<()> {
        let mut guard = self.socket.lock();
        let socket = guard.as_mut().ok_or(ManifoldError::SocketClosed)?;
        socket.send_frame(frame, false, true)?;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Tear down the bound socket. Sends after this fail with
    /// `SocketClosed`; the publish counter is retained.
    pub fn close(&self) {
        let mut guard = self.socket.lock();
        if let Some(socket) = guard.as_mut() {
            socket.close();
        }
        *guard = None;
        debug!(endpoint = %self.endpoint, "publisher closed");
    }
}
