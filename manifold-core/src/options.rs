//! Socket configuration options
//!
//! Per-socket configuration for the managed transport: timeouts,
//! keep-alive, reconnect backoff, and high-water-marks. Options are fixed
//! when a socket is created; the stop/restart path constructs the
//! replacement socket from the same value, so a feed keeps its
//! configuration across the whole object lifetime.

use std::time::Duration;

/// Socket configuration options.
///
/// The defaults are the production values of the feed layer: bounded 7 s
/// timeouts so no blocking call hangs forever, TCP keep-alive tuned for
/// long-lived feeds, and an exponential reconnect backoff between 200 ms
/// and 60 s.
///
/// # Examples
///
/// ```
/// use manifold_core::options::SocketOptions;
/// use std::time::Duration;
///
/// let opts = SocketOptions::default()
///     .with_recv_timeout(Duration::from_secs(5))
///     .with_send_hwm(4096);
/// ```
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Maximum time a send may block waiting for socket buffer space.
    ///
    /// - `None`: block indefinitely
    /// - `Some(duration)`: wait up to duration, then time out
    pub send_timeout: Option<Duration>,

    /// Maximum time a receive may block waiting for a message.
    ///
    /// - `None`: block indefinitely
    /// - `Some(duration)`: wait up to duration, then report "no message"
    pub recv_timeout: Option<Duration>,

    /// Enable TCP keep-alive probing on every stream.
    pub tcp_keepalive: bool,

    /// Idle time before the first keep-alive probe.
    pub keepalive_idle: Duration,

    /// Interval between keep-alive probes.
    pub keepalive_interval: Duration,

    /// Number of failed probes before the connection is declared dead.
    /// `None` leaves the OS default (effectively unbounded retries).
    pub keepalive_retries: Option<u32>,

    /// Initial reconnection delay after connection loss.
    pub reconnect_ivl: Duration,

    /// Maximum reconnection delay for exponential backoff.
    pub reconnect_ivl_max: Duration,

    /// Maximum number of whole messages queued per peer on the send side.
    /// When reached, further messages for that peer are dropped.
    pub send_hwm: usize,

    /// Maximum number of whole messages queued on the receive side.
    pub recv_hwm: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            // 7 second timeouts keep blocking calls from hanging forever
            send_timeout: Some(Duration::from_secs(7)),
            recv_timeout: Some(Duration::from_secs(7)),
            tcp_keepalive: true,
            keepalive_idle: Duration::from_secs(120),
            keepalive_interval: Duration::from_secs(30),
            keepalive_retries: None,
            reconnect_ivl: Duration::from_millis(200),
            reconnect_ivl_max: Duration::from_secs(60),
            send_hwm: 1024,
            recv_hwm: 1024,
        }
    }
}

impl SocketOptions {
    /// Create new socket options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set send timeout. `None` blocks indefinitely.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    /// Set receive timeout. `None` blocks indefinitely.
    pub fn with_recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = Some(timeout);
        self
    }

    /// Enable or disable TCP keep-alive.
    pub fn with_tcp_keepalive(mut self, enabled: bool) -> Self {
        self.tcp_keepalive = enabled;
        self
    }

    /// Set keep-alive idle time before the first probe.
    pub fn with_keepalive_idle(mut self, idle: Duration) -> Self {
        self.keepalive_idle = idle;
        self
    }

    /// Set the interval between keep-alive probes.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the number of keep-alive probes before giving up.
    pub fn with_keepalive_retries(mut self, retries: Option<u32>) -> Self {
        self.keepalive_retries = retries;
        self
    }

    /// Set reconnection interval.
    pub fn with_reconnect_ivl(mut self, ivl: Duration) -> Self {
        self.reconnect_ivl = ivl;
        self
    }

    /// Set maximum reconnection interval for exponential backoff.
    pub fn with_reconnect_ivl_max(mut self, max: Duration) -> Self {
        self.reconnect_ivl_max = max;
        self
    }

    /// Set send high water mark.
    pub fn with_send_hwm(mut self, hwm: usize) -> Self {
        self.send_hwm = hwm;
        self
    }

    /// Set receive high water mark.
    pub fn with_recv_hwm(mut self, hwm: usize) -> Self {
        self.recv_hwm = hwm;
        self
    }
}
