//! Managed subscribe side: one connect-side socket, a dedicated
//! background read thread, stop/refresh machinery, and the per-subscriber
//! buffer pool frames are delivered in.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use manifold_core::endpoint::{Endpoint, EndpointError};
use manifold_core::error::Result;
use manifold_core::gate::Gate;
use manifold_core::options::SocketOptions;
use manifold_core::pool::{BufferPool, PooledBuf};
use manifold_core::socket::{FeedSocket, FrameQueue};

use crate::open_socket;

/// Bounded wait for the connect-scoped lock; a `start` that cannot take
/// it in time does nothing and reports `false`.
const CONNECT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period after signalling stop, before teardown begins.
const STOP_GRACE: Duration = Duration::from_millis(500);

/// Time allowed for an in-flight receive to unwind during teardown.
const STOP_UNWIND: Duration = Duration::from_secs(3);

/// Settle period after the fresh socket is installed.
const STOP_SETTLE: Duration = Duration::from_millis(300);

/// Bound on frames accepted per message, capping pool rentals per receive.
const MAX_FRAMES_PER_MESSAGE: usize = 100;

/// Pause after a non-timeout receive failure so the loop cannot spin hot.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Handler invoked on the read thread with each received message.
pub type MessageHandler = Box<dyn FnMut(&SubscriberHandle, FrameQueue) + Send + 'static>;

struct Shared {
    endpoints: Vec<Endpoint>,
    topic: Bytes,
    options: SocketOptions,
    socket: Mutex<Option<Box<dyn FeedSocket>>>,
    gate: Gate,
    pool: BufferPool,
    handler: Mutex<Option<MessageHandler>>,
    /// Whole messages delivered (one per message, not per frame)
    received: AtomicU64,
}

/// Lightweight view of a subscriber handed to the message handler (and
/// available via [`Subscriber::handle`]) so buffers can be returned from
/// any thread.
#[derive(Clone)]
pub struct SubscriberHandle {
    shared: Arc<Shared>,
}

impl SubscriberHandle {
    /// Return a delivered frame's buffer to the subscriber's pool.
    pub fn return_buffer(&self, buf: PooledBuf) {
        self.shared.pool.give(buf);
    }

    /// Whole messages delivered so far.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// The endpoints this subscriber connects to.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.shared.endpoints
    }
}

/// A subscriber connected to one or more publishers.
///
/// Construct with [`Subscriber::broadcast`] to receive every message, or
/// [`Subscriber::with_topic`] to filter by a topic-frame byte prefix.
/// The two variants differ only in the prefix used at subscribe time.
///
/// `start` clears the stop signal, connects, subscribes, and spawns the
/// background read thread if none is alive. The read loop hands each
/// received message to the registered handler *synchronously on the read
/// thread*: there is no hidden queue between receive and delivery, so a
/// slow handler throttles the whole feed. Handler panics are caught and
/// never kill the thread.
///
/// `stop` signals the loop, waits fixed grace periods for it to unwind,
/// then replaces the socket with a fresh identically-configured one, so
/// the subscriber can be started again without reconstruction. Counters
/// survive stop/start.
pub struct Subscriber {
    shared: Arc<Shared>,
    connect_lock: Mutex<()>,
    read_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Subscriber for every message, regardless of topic.
    pub fn broadcast(endpoints: &[&str]) -> Result<Self> {
        Self::with_options(endpoints, &[], SocketOptions::default())
    }

    /// Subscriber filtered to messages whose topic frame starts with
    /// `topic`.
    pub fn with_topic(endpoints: &[&str], topic: &[u8]) -> Result<Self> {
        Self::with_options(endpoints, topic, SocketOptions::default())
    }

    /// Subscriber with explicit socket configuration. An empty `topic`
    /// subscribes to everything.
    pub fn with_options(endpoints: &[&str], topic: &[u8], options: SocketOptions) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(EndpointError::NoEndpoints.into());
        }
        let endpoints = endpoints
            .iter()
            .map(|s| Endpoint::parse(s))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if endpoints.windows(2).any(|w| !w[0].same_scheme(&w[1])) {
            return Err(EndpointError::MixedSchemes.into());
        }

        let socket = open_socket(&endpoints[0], &options);
        Ok(Self {
            shared: Arc::new(Shared {
                endpoints,
                topic: Bytes::copy_from_slice(topic),
                options,
                socket: Mutex::new(Some(socket)),
                gate: Gate::new(),
                pool: BufferPool::new(),
                handler: Mutex::new(None),
                received: AtomicU64::new(0),
            }),
            connect_lock: Mutex::new(()),
            read_thread: Mutex::new(None),
        })
    }

    /// Register the message handler, replacing any previous one.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(&SubscriberHandle, FrameQueue) + Send + 'static,
    {
        *self.shared.handler.lock() = Some(Box::new(handler));
    }

    /// Remove the registered handler. Messages received without a handler
    /// have their buffers returned to the pool and are counted as
    /// delivered.
    pub fn clear_handler(&self) {
        *self.shared.handler.lock() = None;
    }

    /// A cloneable handle for returning buffers and reading counters.
    #[must_use]
    pub fn handle(&self) -> SubscriberHandle {
        SubscriberHandle {
            shared: self.shared.clone(),
        }
    }

    /// Return a delivered frame's buffer to the pool.
    pub fn return_buffer(&self, buf: PooledBuf) {
        self.shared.pool.give(buf);
    }

    /// Whole messages delivered so far. Not reset by stop/start.
    #[must_use]
    pub fn received(&self) -> u64 {
        self.shared.received.load(Ordering::Relaxed)
    }

    /// The endpoints this subscriber connects to.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.shared.endpoints
    }

    /// Clear the stop signal and connect.
    ///
    /// Returns `false`, having done nothing, when the connect-scoped
    /// lock cannot be taken within its 5 s bound or when connecting or
    /// subscribing fails; retrying `start` is safe either way.
    pub fn start(&self) -> bool {
        self.shared.gate.resume();
        self.connect()
    }

    fn connect(&self) -> bool {
        let Some(_connect_guard) = self.connect_lock.try_lock_for(CONNECT_LOCK_TIMEOUT) else {
            warn!("connect lock not acquired within {CONNECT_LOCK_TIMEOUT:?}, start skipped");
            return false;
        };

        {
            let mut guard = self.shared.socket.lock();
            let Some(socket) = guard.as_mut() else {
                error!("subscriber has no socket");
                return false;
            };
            for endpoint in &self.shared.endpoints {
                if let Err(e) = socket.connect(endpoint) {
                    error!(%endpoint, error = %e, "connect failed");
                    return false;
                }
            }
            if let Err(e) = socket.subscribe(&self.shared.topic) {
                error!(error = %e, "subscribe failed");
                return false;
            }
        }

        let mut read_thread = self.read_thread.lock();
        let alive = read_thread.as_ref().is_some_and(|h| !h.is_finished());
        if !alive {
            let shared = self.shared.clone();
            match thread::Builder::new()
                .name("manifold-read".into())
                .spawn(move || read_loop(&shared))
            {
                Ok(handle) => *read_thread = Some(handle),
                Err(e) => {
                    error!(error = %e, "failed to spawn read thread");
                    return false;
                }
            }
        }
        true
    }

    /// Signal the read loop to stop, then tear down and replace the
    /// socket so the subscriber is restartable.
    ///
    /// Best-effort and time-boxed by fixed grace periods; a receive
    /// already blocked inside the socket may delay actual thread exit by
    /// up to its own timeout.
    pub fn stop(&self) {
        self.shared.gate.halt();
        thread::sleep(STOP_GRACE);
        self.disconnect();
    }

    fn disconnect(&self) {
        self.shared.gate.halt();
        thread::sleep(STOP_UNWIND);

        {
            let mut guard = self.shared.socket.lock();
            if let Some(socket) = guard.as_mut() {
                if let Err(e) = socket.unsubscribe(&self.shared.topic) {
                    debug!(error = %e, "unsubscribe during stop failed");
                }
                socket.close();
            }
            // Fresh socket with identical configuration: the subscriber
            // stays restartable without reconstruction.
            *guard = Some(open_socket(&self.shared.endpoints[0], &self.shared.options));
        }
        debug!("subscriber socket refreshed");

        thread::sleep(STOP_SETTLE);
    }
}

fn read_loop(shared: &Arc<Shared>) {
    debug!("read loop started");
    loop {
        if shared.gate.is_halted() {
            break;
        }
        let outcome = {
            let mut guard = shared.socket.lock();
            match guard.as_mut() {
                Some(socket) => socket.recv_message(&shared.pool, MAX_FRAMES_PER_MESSAGE),
                None => Ok(None),
            }
        };
        let frames = match outcome {
            Ok(Some(frames)) if !frames.is_empty() => frames,
            // No message within the receive timeout: not an error
            Ok(_) => continue,
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                // Transport errors never terminate the loop; only the gate does
                debug!(error = %e, "receive failed");
                thread::sleep(RECEIVE_RETRY_DELAY);
                continue;
            }
        };
        shared.received.fetch_add(1, Ordering::Relaxed);
        dispatch(shared, frames);
    }
    debug!("read loop exited");
}

/// Hand a message to the registered handler, isolating the loop from
/// handler panics. The handler is taken out of its slot for the duration
/// of the call so it can re-register or clear itself without deadlock.
fn dispatch(shared: &Arc<Shared>, frames: FrameQueue) {
    let taken = shared.handler.lock().take();
    let Some(mut handler) = taken else {
        for buf in frames {
            shared.pool.give(buf);
        }
        return;
    };

    let handle = SubscriberHandle {
        shared: shared.clone(),
    };
    if catch_unwind(AssertUnwindSafe(|| handler(&handle, frames))).is_err() {
        warn!("message handler panicked; read loop continues");
    }

    let mut slot = shared.handler.lock();
    if slot.is_none() {
        *slot = Some(handler);
    }
}
