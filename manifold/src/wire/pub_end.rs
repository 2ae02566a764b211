//! Publish side of the TCP backend.
//!
//! A bound socket runs one accept thread. Every accepted subscriber gets a
//! bounded send queue drained by a dedicated writer thread, plus a control
//! reader thread that applies incoming subscribe/unsubscribe frames to the
//! peer's subscription set. Routing happens on the caller's thread at
//! message completion: matching peers get the message queued, a full queue
//! drops it for that peer only.

use std::io::Write;
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use manifold_core::endpoint::Endpoint;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::SocketOptions;
use manifold_core::subscription::{SubscriptionAction, SubscriptionSet};

use super::apply_stream_options;
use super::codec::{encode_message, FrameDecoder, MAX_FRAME_SIZE};

/// Poll interval of the non-blocking accept loop.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout of the control reader, bounding stop latency.
const CONTROL_POLL: Duration = Duration::from_millis(500);

type PeerMessage = Arc<Vec<Bytes>>;

struct Peer {
    id: u64,
    subs: Arc<RwLock<SubscriptionSet>>,
    tx: Sender<PeerMessage>,
    alive: Arc<AtomicBool>,
}

pub(super) struct PubEnd {
    peers: Arc<Mutex<Vec<Peer>>>,
    stop: Arc<AtomicBool>,
    /// Frames of the message currently being assembled
    pending: SmallVec<[Bytes; 4]>,
}

impl PubEnd {
    pub(super) fn bind(endpoint: &Endpoint, options: &SocketOptions) -> Result<Self> {
        let addr = endpoint.bind_addr().ok_or(ManifoldError::InvalidOperation(
            "tcp socket needs a tcp endpoint",
        ))?;
        let listener = make_listener(&addr)?;
        listener.set_nonblocking(true)?;

        let peers: Arc<Mutex<Vec<Peer>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        thread::Builder::new().name("manifold-accept".into()).spawn({
            let peers = peers.clone();
            let stop = stop.clone();
            let options = options.clone();
            move || accept_loop(&listener, &peers, &stop, &options)
        })?;

        debug!(%endpoint, "publisher listening");
        Ok(Self {
            peers,
            stop,
            pending: SmallVec::new(),
        })
    }

    pub(super) fn send_frame(&mut self, frame: &[u8], more: bool, _dont_wait: bool) -> Result<()> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ManifoldError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        self.pending.push(Bytes::copy_from_slice(frame));
        if more {
            return Ok(());
        }

        let msg: PeerMessage = Arc::new(self.pending.drain(..).collect());
        let topic = msg.first().map_or(&[][..], |f| f.as_ref());
        let mut peers = self.peers.lock();
        peers.retain(|peer| {
            if !peer.alive.load(Ordering::Relaxed) {
                return false;
            }
            if !peer.subs.read().matches(topic) {
                return true;
            }
            match peer.tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // Slow subscriber at its high-water-mark
                    trace!(peer = peer.id, "send queue full, message dropped");
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        Ok(())
    }

    pub(super) fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the senders ends every writer thread
        self.peers.lock().clear();
        self.pending.clear();
    }
}

impl Drop for PubEnd {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Build the listener through socket2 so SO_REUSEADDR is set: a restarted
/// publisher must be able to rebind its port while old connections linger
/// in TIME_WAIT.
fn make_listener(addr: &str) -> std::io::Result<TcpListener> {
    use std::net::ToSocketAddrs;

    let target = addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "bind address did not resolve")
    })?;
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(target),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    socket.set_reuse_address(true)?;
    socket.bind(&target.into())?;
    socket.listen(128)?;
    Ok(socket.into())
}

fn accept_loop(
    listener: &TcpListener,
    peers: &Mutex<Vec<Peer>>,
    stop: &Arc<AtomicBool>,
    options: &SocketOptions,
) {
    let mut next_id = 0u64;
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                next_id += 1;
                match attach_peer(next_id, stream, options, stop) {
                    Ok(peer) => {
                        debug!(%addr, peer = next_id, "subscriber attached");
                        peers.lock().push(peer);
                    }
                    Err(e) => warn!(%addr, error = %e, "failed to attach subscriber"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
    debug!("accept loop exited");
}

fn attach_peer(
    id: u64,
    stream: TcpStream,
    options: &SocketOptions,
    stop: &Arc<AtomicBool>,
) -> std::io::Result<Peer> {
    stream.set_nonblocking(false)?;
    apply_stream_options(&stream, options)?;

    let control = stream.try_clone()?;
    control.set_read_timeout(Some(CONTROL_POLL))?;

    let subs: Arc<RwLock<SubscriptionSet>> = Arc::new(RwLock::new(SubscriptionSet::new()));
    let alive = Arc::new(AtomicBool::new(true));
    let (tx, rx) = flume::bounded(options.send_hwm);

    thread::Builder::new().name(format!("manifold-peer-{id}")).spawn({
        let alive = alive.clone();
        move || writer_loop(id, stream, &rx, &alive)
    })?;

    thread::Builder::new().name(format!("manifold-ctl-{id}")).spawn({
        let subs = subs.clone();
        let alive = alive.clone();
        let stop = stop.clone();
        move || control_loop(id, control, &subs, &alive, &stop)
    })?;

    Ok(Peer {
        id,
        subs,
        tx,
        alive,
    })
}

fn writer_loop(id: u64, mut stream: TcpStream, rx: &Receiver<PeerMessage>, alive: &AtomicBool) {
    let mut buf = BytesMut::new();
    for msg in rx.iter() {
        buf.clear();
        if let Err(e) = encode_message(&mut buf, &msg) {
            warn!(peer = id, error = %e, "unencodable message skipped");
            continue;
        }
        if let Err(e) = stream.write_all(&buf) {
            debug!(peer = id, error = %e, "peer write failed");
            break;
        }
    }
    alive.store(false, Ordering::SeqCst);
    let _ = stream.shutdown(Shutdown::Both);
    debug!(peer = id, "writer exited");
}

fn control_loop(
    id: u64,
    mut stream: TcpStream,
    subs: &RwLock<SubscriptionSet>,
    alive: &AtomicBool,
    stop: &AtomicBool,
) {
    let mut decoder = FrameDecoder::new();
    loop {
        if stop.load(Ordering::SeqCst) || !alive.load(Ordering::SeqCst) {
            break;
        }
        match decoder.read_frame(&mut stream) {
            Ok(None) => {} // poll timeout, re-check flags
            Ok(Some(frame)) => {
                if frame.more {
                    warn!(peer = id, "multi-frame control message ignored");
                    continue;
                }
                match SubscriptionAction::decode(&frame.payload) {
                    Some(SubscriptionAction::Subscribe(prefix)) => {
                        trace!(peer = id, ?prefix, "subscribe");
                        subs.write().subscribe(prefix);
                    }
                    Some(SubscriptionAction::Unsubscribe(prefix)) => {
                        trace!(peer = id, ?prefix, "unsubscribe");
                        subs.write().unsubscribe(&prefix);
                    }
                    None => warn!(peer = id, "malformed control frame ignored"),
                }
            }
            Err(e) => {
                debug!(peer = id, error = %e, "control read ended");
                alive.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
}
