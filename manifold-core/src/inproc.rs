//! In-process transport backend for messaging within one process.
//!
//! Bound and connected sockets meet in a process-wide registry of hubs,
//! one per `inproc://name` endpoint. Each connected peer owns a bounded
//! queue (capacity = receive high-water-mark); the bind side routes every
//! completed message to the peers whose subscription matches the topic
//! frame, dropping it for peers whose queue is full (slow-subscriber
//! semantics).
//!
//! Peers outlive the binder: closing a bound socket releases the name but
//! leaves connected peers attached to the hub, so a publisher that is
//! re-created on the same endpoint resumes delivery to existing
//! subscribers. That is the transport-level reconnect guarantee the
//! managed subscriber relies on, in its trivial in-process form.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::endpoint::Endpoint;
use crate::error::{ManifoldError, Result};
use crate::options::SocketOptions;
use crate::pool::BufferPool;
use crate::socket::{queue_frames, FeedSocket, FrameQueue};
use crate::subscription::SubscriptionSet;

/// A complete multipart message in flight between inproc sockets.
type InprocMessage = Vec<Bytes>;

/// Process-wide registry of inproc endpoints.
static REGISTRY: once_cell::sync::Lazy<DashMap<String, Arc<Hub>>> =
    once_cell::sync::Lazy::new(DashMap::new);

/// Meeting point for one endpoint name: the bound flag plus every
/// connected peer.
struct Hub {
    bound: AtomicBool,
    peers: Mutex<Vec<HubPeer>>,
    next_peer: AtomicU64,
}

struct HubPeer {
    id: u64,
    subs: Arc<Mutex<SubscriptionSet>>,
    tx: Sender<InprocMessage>,
}

impl Hub {
    fn new() -> Self {
        Self {
            bound: AtomicBool::new(false),
            peers: Mutex::new(Vec::new()),
            next_peer: AtomicU64::new(0),
        }
    }

    fn attach(&self, subs: Arc<Mutex<SubscriptionSet>>, tx: Sender<InprocMessage>) -> u64 {
        let id = self.next_peer.fetch_add(1, Ordering::Relaxed);
        self.peers.lock().push(HubPeer { id, subs, tx });
        id
    }

    fn detach(&self, id: u64) {
        self.peers.lock().retain(|p| p.id != id);
    }

    /// Deliver a completed message to every matching peer.
    fn route(&self, msg: &InprocMessage) {
        let topic = msg.first().map_or(&[][..], |f| f.as_ref());
        let mut peers = self.peers.lock();
        peers.retain(|peer| {
            if !peer.subs.lock().matches(topic) {
                return true;
            }
            match peer.tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // Queue at high-water-mark: drop for this peer only
                    trace!(peer = peer.id, "peer queue full, message dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(peer = peer.id, "peer gone, detaching");
                    false
                }
            }
        });
    }
}

/// Look up or create the hub for an endpoint name.
fn hub_for(name: &str) -> Arc<Hub> {
    REGISTRY
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(Hub::new()))
        .clone()
}

/// In-process implementation of the socket primitive.
pub struct InprocSocket {
    options: SocketOptions,
    /// Endpoints this socket has bound (publish side)
    bound: Vec<(String, Arc<Hub>)>,
    /// Hubs this socket is attached to as a peer (subscribe side)
    attached: Vec<(String, Arc<Hub>, u64)>,
    /// Subscription set shared with every hub attachment
    subs: Arc<Mutex<SubscriptionSet>>,
    /// Receive queue, created on first connect
    rx: Option<Receiver<InprocMessage>>,
    tx: Option<Sender<InprocMessage>>,
    /// Frames of the message currently being assembled by `send_frame`
    pending: Vec<Bytes>,
    closed: bool,
}

impl InprocSocket {
    /// Create an unbound, unconnected socket with the given configuration.
    #[must_use]
    pub fn new(options: SocketOptions) -> Self {
        Self {
            options,
            bound: Vec::new(),
            attached: Vec::new(),
            subs: Arc::new(Mutex::new(SubscriptionSet::new())),
            rx: None,
            tx: None,
            pending: Vec::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(ManifoldError::SocketClosed)
        } else {
            Ok(())
        }
    }

    fn inproc_name<'a>(&self, endpoint: &'a Endpoint) -> Result<&'a str> {
        match endpoint {
            Endpoint::Inproc(name) => Ok(name),
            Endpoint::Tcp { .. } => Err(ManifoldError::InvalidOperation(
                "inproc socket cannot use a tcp endpoint",
            )),
        }
    }
}

impl FeedSocket for InprocSocket {
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.ensure_open()?;
        let name = self.inproc_name(endpoint)?;
        let hub = hub_for(name);
        if hub.bound.swap(true, Ordering::SeqCst) {
            return Err(ManifoldError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("inproc endpoint '{name}' is already bound"),
            )));
        }
        debug!(endpoint = %endpoint, "inproc bound");
        self.bound.push((name.to_string(), hub));
        Ok(())
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.ensure_open()?;
        let name = self.inproc_name(endpoint)?;
        if !self.bound.is_empty() {
            return Err(ManifoldError::InvalidOperation(
                "connect on a bound socket",
            ));
        }
        if self.attached.iter().any(|(n, _, _)| n == name) {
            // Connecting the same endpoint again is a no-op
            return Ok(());
        }
        if self.rx.is_none() {
            let (tx, rx) = flume::bounded(self.options.recv_hwm);
            self.tx = Some(tx);
            self.rx = Some(rx);
        }
        let tx = self
            .tx
            .as_ref()
            .cloned()
            .ok_or(ManifoldError::InvalidOperation("receive queue missing"))?;
        let hub = hub_for(name);
        let id = hub.attach(self.subs.clone(), tx);
        debug!(endpoint = %endpoint, peer = id, "inproc connected");
        self.attached.push((name.to_string(), hub, id));
        Ok(())
    }

    fn subscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if !self.bound.is_empty() {
            return Err(ManifoldError::InvalidOperation(
                "subscribe on a bound socket",
            ));
        }
        self.subs.lock().subscribe(Bytes::copy_from_slice(prefix));
        Ok(())
    }

    fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.subs.lock().unsubscribe(prefix);
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8], more: bool, _dont_wait: bool) -> Result<()> {
        self.ensure_open()?;
        if self.bound.is_empty() {
            return Err(ManifoldError::InvalidOperation(
                "send on an unbound socket",
            ));
        }
        self.pending.push(Bytes::copy_from_slice(frame));
        if !more {
            let msg = std::mem::take(&mut self.pending);
            for (_, hub) in &self.bound {
                hub.route(&msg);
            }
        }
        Ok(())
    }

    fn recv_message(&mut self, pool: &BufferPool, max_frames: usize) -> Result<Option<FrameQueue>> {
        self.ensure_open()?;
        let rx = self.rx.as_ref().ok_or(ManifoldError::InvalidOperation(
            "receive on an unconnected socket",
        ))?;
        let msg = match self.options.recv_timeout {
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(msg) => msg,
                Err(flume::RecvTimeoutError::Timeout) => return Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(ManifoldError::SocketClosed)
                }
            },
            None => rx.recv().map_err(|_| ManifoldError::SocketClosed)?,
        };
        Ok(Some(queue_frames(
            pool,
            msg.iter().map(Bytes::as_ref),
            max_frames,
        )))
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for (_, hub, id) in self.attached.drain(..) {
            hub.detach(id);
        }
        for (name, hub) in self.bound.drain(..) {
            hub.bound.store(false, Ordering::SeqCst);
            debug!(endpoint = %name, "inproc unbound");
        }
        self.rx = None;
        self.tx = None;
        self.pending.clear();
    }
}

impl Drop for InprocSocket {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn opts() -> SocketOptions {
        SocketOptions::default().with_recv_timeout(Duration::from_millis(100))
    }

    fn send_msg(socket: &mut InprocSocket, frames: &[&[u8]]) {
        let last = frames.len() - 1;
        for (j, frame) in frames.iter().enumerate() {
            socket.send_frame(frame, j < last, true).unwrap();
        }
    }

    #[test]
    fn test_bind_duplicate() {
        let ep = Endpoint::parse("inproc://test-dup").unwrap();
        let mut a = InprocSocket::new(opts());
        a.bind(&ep).unwrap();

        let mut b = InprocSocket::new(opts());
        let err = b.bind(&ep).unwrap_err();
        assert!(matches!(err, ManifoldError::Io(_)));
    }

    #[test]
    fn test_pubsub_round_trip() {
        let ep = Endpoint::parse("inproc://test-roundtrip").unwrap();
        let mut publisher = InprocSocket::new(opts());
        publisher.bind(&ep).unwrap();

        let mut subscriber = InprocSocket::new(opts());
        subscriber.connect(&ep).unwrap();
        subscriber.subscribe(b"").unwrap();

        send_msg(&mut publisher, &[b"topic", b"payload"]);

        let pool = BufferPool::new();
        let msg = subscriber.recv_message(&pool, 100).unwrap().unwrap();
        assert_eq!(msg.len(), 2);
        assert_eq!(msg[0].as_slice(), b"topic");
        assert_eq!(msg[1].as_slice(), b"payload");
    }

    #[test]
    fn test_topic_filtering() {
        let ep = Endpoint::parse("inproc://test-filter").unwrap();
        let mut publisher = InprocSocket::new(opts());
        publisher.bind(&ep).unwrap();

        let mut subscriber = InprocSocket::new(opts());
        subscriber.connect(&ep).unwrap();
        subscriber.subscribe(&[0x03]).unwrap();

        send_msg(&mut publisher, &[&[0x04], b"skipped"]);
        send_msg(&mut publisher, &[&[0x03], b"delivered"]);

        let pool = BufferPool::new();
        let msg = subscriber.recv_message(&pool, 100).unwrap().unwrap();
        assert_eq!(msg[0].as_slice(), &[0x03]);
        // Nothing else queued
        assert!(subscriber.recv_message(&pool, 100).unwrap().is_none());
    }

    #[test]
    fn test_unsubscribed_peer_receives_nothing() {
        let ep = Endpoint::parse("inproc://test-nosub").unwrap();
        let mut publisher = InprocSocket::new(opts());
        publisher.bind(&ep).unwrap();

        let mut subscriber = InprocSocket::new(opts());
        subscriber.connect(&ep).unwrap();

        send_msg(&mut publisher, &[b"topic"]);

        let pool = BufferPool::new();
        assert!(subscriber.recv_message(&pool, 100).unwrap().is_none());
    }

    #[test]
    fn test_rebind_reaches_existing_peers() {
        let ep = Endpoint::parse("inproc://test-rebind").unwrap();
        let mut subscriber = InprocSocket::new(opts());

        {
            let mut first = InprocSocket::new(opts());
            first.bind(&ep).unwrap();
            subscriber.connect(&ep).unwrap();
            subscriber.subscribe(b"").unwrap();
            send_msg(&mut first, &[b"one"]);
            first.close();
        }

        let mut second = InprocSocket::new(opts());
        second.bind(&ep).unwrap();
        send_msg(&mut second, &[b"two"]);

        let pool = BufferPool::new();
        let first_msg = subscriber.recv_message(&pool, 100).unwrap().unwrap();
        assert_eq!(first_msg[0].as_slice(), b"one");
        let second_msg = subscriber.recv_message(&pool, 100).unwrap().unwrap();
        assert_eq!(second_msg[0].as_slice(), b"two");
    }

    #[test]
    fn test_closed_socket_rejects_operations() {
        let ep = Endpoint::parse("inproc://test-closed").unwrap();
        let mut socket = InprocSocket::new(opts());
        socket.bind(&ep).unwrap();
        socket.close();
        assert!(matches!(
            socket.send_frame(b"x", false, true),
            Err(ManifoldError::SocketClosed)
        ));
    }

    #[test]
    fn test_hwm_drops_for_slow_peer() {
        let ep = Endpoint::parse("inproc://test-hwm").unwrap();
        let mut publisher = InprocSocket::new(opts());
        publisher.bind(&ep).unwrap();

        let mut subscriber = InprocSocket::new(opts().with_recv_hwm(2));
        subscriber.connect(&ep).unwrap();
        subscriber.subscribe(b"").unwrap();

        for j in 0..5u8 {
            send_msg(&mut publisher, &[&[j]]);
        }

        // Only the first two fit the queue; the rest were dropped
        let pool = BufferPool::new();
        let mut seen = Vec::new();
        while let Some(msg) = subscriber.recv_message(&pool, 100).unwrap() {
            seen.push(msg[0].as_slice()[0]);
        }
        assert_eq!(seen, vec![0, 1]);
    }
}
