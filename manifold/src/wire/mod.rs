//! TCP backend of the socket primitive.
//!
//! A [`TcpSocket`] takes its role from the first call made on it: `bind`
//! turns it into the publish side (listener, per-peer send queues and
//! writer threads), `connect` into the subscribe side (one link thread per
//! endpoint with transport-level reconnect). Frames travel as
//! `[flags][len u32][payload]` (see [`codec`]); subscriptions travel
//! upstream as single-frame control messages.

pub mod codec;

mod pub_end;
mod sub_end;

use std::io;
use std::net::TcpStream;

use manifold_core::endpoint::Endpoint;
use manifold_core::error::{ManifoldError, Result};
use manifold_core::options::SocketOptions;
use manifold_core::pool::BufferPool;
use manifold_core::socket::{FeedSocket, FrameQueue};

use pub_end::PubEnd;
use sub_end::SubEnd;

/// Apply per-stream TCP configuration: NODELAY plus keep-alive probing per
/// the socket options.
pub(crate) fn apply_stream_options(stream: &TcpStream, options: &SocketOptions) -> io::Result<()> {
    let sock = socket2::SockRef::from(stream);
    sock.set_nodelay(true)?;
    if options.tcp_keepalive {
        #[allow(unused_mut)]
        let mut keepalive = socket2::TcpKeepalive::new()
            .with_time(options.keepalive_idle)
            .with_interval(options.keepalive_interval);
        #[cfg(not(any(target_os = "openbsd", target_os = "windows")))]
        if let Some(retries) = options.keepalive_retries {
            keepalive = keepalive.with_retries(retries);
        }
        sock.set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

enum Role {
    Idle,
    Publish(PubEnd),
    Subscribe(SubEnd),
}

/// TCP implementation of the socket primitive.
pub struct TcpSocket {
    options: SocketOptions,
    role: Role,
    closed: bool,
}

impl TcpSocket {
    /// Create an unbound, unconnected socket with the given configuration.
    #[must_use]
    pub fn new(options: SocketOptions) -> Self {
        Self {
            options,
            role: Role::Idle,
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
}

impl FeedSocket for TcpSocket {
    fn bind(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.ensure_open()?;
        match self.role {
            Role::Idle => {
                self.role = Role::Publish(PubEnd::bind(endpoint, &self.options)?);
                Ok(())
            }
            _ => Err(ManifoldError::InvalidOperation(
                "socket is already bound or connected",
            )),
        }
    }

    fn connect(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Idle => {
                let mut end = SubEnd::new(&self.options);
                end.connect(endpoint)?;
                self.role = Role::Subscribe(end);
                Ok(())
            }
            Role::Subscribe(end) => end.connect(endpoint),
            Role::Publish(_) => Err(ManifoldError::InvalidOperation(
                "connect on a bound socket",
            )),
        }
    }

    fn subscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Subscribe(end) => end.subscribe(prefix),
            _ => Err(ManifoldError::InvalidOperation(
                "subscribe before connect",
            )),
        }
    }

    fn unsubscribe(&mut self, prefix: &[u8]) -> Result<()> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Subscribe(end) => end.unsubscribe(prefix),
            _ => Err(ManifoldError::InvalidOperation(
                "unsubscribe before connect",
            )),
        }
    }

    fn send_frame(&mut self, frame: &[u8], more: bool, dont_wait: bool) -> Result<()> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Publish(end) => end.send_frame(frame, more, dont_wait),
            _ => Err(ManifoldError::InvalidOperation(
                "send on a connect-side socket",
            )),
        }
    }

    fn recv_message(&mut self, pool: &BufferPool, max_frames: usize) -> Result<Option<FrameQueue>> {
        self.ensure_open()?;
        match &mut self.role {
            Role::Subscribe(end) => end.recv_message(pool, max_frames),
            _ => Err(ManifoldError::InvalidOperation(
                "receive on a bind-side socket",
            )),
        }
    }

    fn options(&self) -> &SocketOptions {
        &self.options
    }

    fn close(&mut self) {
        self.closed = true;
        self.role = Role::Idle;
    }
}
