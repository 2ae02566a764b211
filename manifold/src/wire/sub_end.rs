//! Subscribe side of the TCP backend.
//!
//! One link thread per endpoint runs connect → replay subscriptions → read
//! loop, reconnecting with exponential backoff whenever the connection
//! drops. This is the transport-level reconnect machinery the managed
//! subscriber deliberately relies on instead of carrying its own retry
//! logic. Completed messages from every link feed one bounded queue that
//! `recv_message` pops with the configured receive timeout.

use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use manifold_core::backoff::Backoff;
use manifold_core::endpoint::Endpoint;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::SocketOptions;
use manifold_core::pool::BufferPool;
use manifold_core::socket::{queue_frames, FrameQueue};
use manifold_core::subscription::{SubscriptionAction, SubscriptionSet};

use super::apply_stream_options;
use super::codec::{encode_frame, FrameDecoder};

/// Read timeout while connected, bounding stop-detection latency.
const LINK_POLL: Duration = Duration::from_secs(1);

/// Bound on a single dial attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

struct Link {
    endpoint: Endpoint,
    /// Write half used for subscription control; cleared while the link is
    /// down and re-installed by the link thread after every reconnect.
    writer: Arc<Mutex<Option<TcpStream>>>,
}

pub(super) struct SubEnd {
    options: SocketOptions,
    stop: Arc<AtomicBool>,
    subs: Arc<RwLock<SubscriptionSet>>,
    links: Vec<Link>,
    msg_tx: Sender<Vec<Bytes>>,
    msg_rx: Receiver<Vec<Bytes>>,
}

impl SubEnd {
    pub(super) fn new(options: &SocketOptions) -> Self {
        let (msg_tx, msg_rx) = flume::bounded(options.recv_hwm);
        Self {
            options: options.clone(),
            stop: Arc::new(AtomicBool::new(false)),
            subs: Arc::new(RwLock::new(SubscriptionSet::new())),
            links: Vec::new(),
            msg_tx,
            msg_rx,
        }
    }

    pub(super) fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        let addr = endpoint.connect_addr().ok_or(ManifoldError::InvalidOperation(
            "tcp socket needs a tcp endpoint",
        ))?;
        if self.links.iter().any(|l| &l.endpoint == endpoint) {
            // Connecting the same endpoint again is a no-op
            return Ok(());
        }
        let writer: Arc<Mutex<Option<TcpStream>>> = Arc::new(Mutex::new(None));
        thread::Builder::new().name("manifold-link".into()).spawn({
            let endpoint = endpoint.clone();
            let options = self.options.clone();
            let stop = self.stop.clone();
            let subs = self.subs.clone();
            let writer = writer.clone();
            let msg_tx = self.msg_tx.clone();
            move || link_loop(&endpoint, &addr, &options, &stop, &subs, &writer, &msg_tx)
        })?;
        self.links.push(Link {
            endpoint: endpoint.clone(),
            writer,
        });
        Ok(())
    }

    pub(super) fn subscribe(&mut self, prefix: &[u8]) -> Result<()> {
        let prefix = Bytes::copy_from_slice(prefix);
        self.subs.write().subscribe(prefix.clone());
        self.send_control(&SubscriptionAction::Subscribe(prefix));
        Ok(())
    }

    pub(super) fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.subs.write().unsubscribe(prefix);
        self.send_control(&SubscriptionAction::Unsubscribe(Bytes::copy_from_slice(
            prefix,
        )));
        Ok(())
    }

    /// Push a control frame to every live link. A link that is down will
    /// replay the full subscription set when it reconnects.
    fn send_control(&self, action: &SubscriptionAction) {
        for link in &self.links {
            let mut slot = link.writer.lock();
            if let Some(stream) = slot.as_mut() {
                if let Err(e) = write_control(stream, action) {
                    debug!(endpoint = %link.endpoint, error = %e, "control send failed");
                    *slot = None;
                }
            }
        }
    }

    pub(super) fn recv_message(
        &mut self,
        pool: &BufferPool,
        max_frames: usize,
    ) -> Result<Option<FrameQueue>> {
        let msg = match self.options.recv_timeout {
            Some(timeout) => match self.msg_rx.recv_timeout(timeout) {
                Ok(msg) => msg,
                Err(flume::RecvTimeoutError::Timeout) => return Ok(None),
                Err(flume::RecvTimeoutError::Disconnected) => {
                    return Err(ManifoldError::SocketClosed)
                }
            },
            None => self
                .msg_rx
                .recv()
                .map_err(|_| ManifoldError::SocketClosed)?,
        };
        Ok(Some(queue_frames(
            pool,
            msg.iter().map(Bytes::as_ref),
            max_frames,
        )))
    }

    pub(super) fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for link in &self.links {
            if let Some(stream) = link.writer.lock().take() {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for SubEnd {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_control(stream: &mut TcpStream, action: &SubscriptionAction) -> Result<()> {
    let mut buf = BytesMut::new();
    encode_frame(&mut buf, &action.encode(), false)?;
    stream.write_all(&buf)?;
    Ok(())
}

fn link_loop(
    endpoint: &Endpoint,
    addr: &str,
    options: &SocketOptions,
    stop: &Arc<AtomicBool>,
    subs: &RwLock<SubscriptionSet>,
    writer_slot: &Mutex<Option<TcpStream>>,
    msg_tx: &Sender<Vec<Bytes>>,
) {
    let mut backoff = Backoff::from_options(options);
    while !stop.load(Ordering::SeqCst) {
        let stream = match dial(addr) {
            Ok(stream) => stream,
            Err(e) => {
                trace!(%endpoint, error = %e, "connect failed");
                thread::sleep(backoff.next_delay());
                continue;
            }
        };
        backoff.reset();

        if let Err(e) = prepare_link(&stream, options, subs, writer_slot) {
            warn!(%endpoint, error = %e, "link setup failed");
            thread::sleep(backoff.next_delay());
            continue;
        }
        debug!(%endpoint, "link established");

        read_messages(stream, stop, subs, msg_tx);

        *writer_slot.lock() = None;
        if stop.load(Ordering::SeqCst) {
            break;
        }
        debug!(%endpoint, "link lost, reconnecting");
        thread::sleep(backoff.next_delay());
    }
    debug!(%endpoint, "link thread exited");
}

fn dial(addr: &str) -> std::io::Result<TcpStream> {
    let target = addr.to_socket_addrs()?.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "endpoint did not resolve")
    })?;
    TcpStream::connect_timeout(&target, CONNECT_TIMEOUT)
}

/// Configure the fresh stream, replay the current subscription set, and
/// install the write half for later control sends.
fn prepare_link(
    stream: &TcpStream,
    options: &SocketOptions,
    subs: &RwLock<SubscriptionSet>,
    writer_slot: &Mutex<Option<TcpStream>>,
) -> Result<()> {
    apply_stream_options(stream, options)?;
    stream.set_read_timeout(Some(LINK_POLL))?;

    let mut control = stream.try_clone()?;
    let mut slot = writer_slot.lock();
    for prefix in subs.read().prefixes() {
        write_control(&mut control, &SubscriptionAction::Subscribe(prefix.clone()))?;
    }
    *slot = Some(control);
    Ok(())
}

fn read_messages(
    mut stream: TcpStream,
    stop: &AtomicBool,
    subs: &RwLock<SubscriptionSet>,
    msg_tx: &Sender<Vec<Bytes>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut frames: Vec<Bytes> = Vec::new();
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        match decoder.read_frame(&mut stream) {
            Ok(None) => {} // poll timeout, re-check stop
            Ok(Some(frame)) => {
                frames.push(frame.payload);
                if frame.more {
                    continue;
                }
                let msg = std::mem::take(&mut frames);
                let topic = msg.first().map_or(&[][..], |f| f.as_ref());
                if !subs.read().matches(topic) {
                    // In-flight message for a prefix we just dropped
                    continue;
                }
                if msg_tx.send(msg).is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "link read ended");
                return;
            }
        }
    }
}
