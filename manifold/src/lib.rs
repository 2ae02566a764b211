//! # Manifold
//!
//! A managed transport layer on top of a message-oriented, frame-based
//! socket primitive: producers emit multi-frame messages atomically from
//! the application's point of view, consumers receive frame sequences off
//! a background thread, and reconnects, buffer reuse, and per-socket
//! configuration are handled without burdening callers.
//!
//! ## Architecture
//!
//! - **`manifold-core`**: endpoint/options/error types, the buffer pool,
//!   the socket-primitive contract, and the in-process backend
//! - **`manifold`**: the managed [`Publisher`] and [`Subscriber`] plus the
//!   TCP wire backend (this crate)
//!
//! The backend is selected by endpoint scheme: `tcp://host:port` for the
//! wire, `inproc://name` within one process.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use manifold::{Message, Publisher, Subscriber};
//!
//! # fn main() -> manifold_core::error::Result<()> {
//! // Bind a publisher
//! let publisher = Publisher::bind("tcp://*:54321")?;
//!
//! // Subscribe to one topic prefix
//! let subscriber = Subscriber::with_topic(&["tcp://127.0.0.1:54321"], b"quotes")?;
//! subscriber.on_message(|handle, frames| {
//!     for frame in frames {
//!         println!("frame: {} bytes", frame.len());
//!         handle.return_buffer(frame);
//!     }
//! });
//! assert!(subscriber.start());
//!
//! // Publish: topic frame first, payload after
//! let frames = Message::new().push_str("quotes").push_str("42.5").into_frames();
//! publisher.send(&frames)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Delivery contract
//!
//! - A message is fully sent or the send fails before completion is
//!   reported; concurrent sends never interleave frames.
//! - The message handler runs synchronously on the read thread and must
//!   return every frame's buffer to the pool.
//! - Robustness against a dead peer comes from receive timeouts plus the
//!   transport's own reconnect backoff, not subscriber-level retry logic.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dev_tracing;
pub mod wire;

mod publisher;
mod subscriber;

pub use publisher::Publisher;
pub use subscriber::{MessageHandler, Subscriber, SubscriberHandle};

// Re-export the core vocabulary so most callers need only this crate
pub use bytes::Bytes;
pub use manifold_core::endpoint::{Endpoint, EndpointError};
pub use manifold_core::error::{ManifoldError, Result};
pub use manifold_core::inproc::InprocSocket;
pub use manifold_core::message::Message;
pub use manifold_core::options::SocketOptions;
pub use manifold_core::pool::{BufferPool, PooledBuf, SizeClass};
pub use manifold_core::socket::{FeedSocket, FrameQueue};

/// Pick the transport backend for an endpoint's scheme.
pub(crate) fn open_socket(endpoint: &Endpoint, options: &SocketOptions) -> Box<dyn FeedSocket> {
    match endpoint {
        Endpoint::Tcp { .. } => Box::new(wire::TcpSocket::new(options.clone())),
        Endpoint::Inproc(_) => Box::new(InprocSocket::new(options.clone())),
    }
}
