//! Reconnection backoff with exponential delay growth.
//!
//! Tracks consecutive connection attempts and yields the delay to sleep
//! before the next one: the base interval doubles per attempt up to the
//! configured maximum, and resets after a successful connection.

use std::time::Duration;

use crate::options::SocketOptions;

/// Exponential reconnect delay schedule.
///
/// # Example
///
/// ```
/// use manifold_core::backoff::Backoff;
/// use std::time::Duration;
///
/// let mut backoff = Backoff::new(Duration::from_millis(200), Duration::from_secs(60));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// assert_eq!(backoff.next_delay(), Duration::from_millis(400));
/// backoff.reset();
/// assert_eq!(backoff.next_delay(), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
    current: Duration,
}

impl Backoff {
    /// Create a schedule growing from `base` to at most `max`.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
            current: base,
        }
    }

    /// Create a schedule from socket options.
    #[must_use]
    pub const fn from_options(options: &SocketOptions) -> Self {
        Self::new(options.reconnect_ivl, options.reconnect_ivl_max)
    }

    /// Delay to wait before the next connection attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.attempt = self.attempt.saturating_add(1);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Reset after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current = self.base;
    }

    /// Number of delays handed out since the last reset.
    #[inline]
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}
