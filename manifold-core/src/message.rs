//! Ergonomic builder for constructing multi-frame messages.
//!
//! A message is an ordered, non-empty sequence of frames sent as one
//! logical unit. The builder collects frames as `Bytes`, so a frame can be
//! a cheap sub-range of a larger buffer.

use bytes::Bytes;

/// Builder for multi-frame messages.
///
/// # Examples
///
/// ```
/// use manifold_core::message::Message;
///
/// // Topic frame first, payload after
/// let frames = Message::new()
///     .push_str("quotes")
///     .push(vec![1u8, 2, 3, 4])
///     .into_frames();
/// assert_eq!(frames.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Message {
    frames: Vec<Bytes>,
}

impl Message {
    /// Create a new empty message builder.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Create a message with pre-allocated frame capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    /// Add a frame from any type that can be converted to `Bytes`.
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Add a UTF-8 string frame.
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.frames.push(Bytes::copy_from_slice(s.as_bytes()));
        self
    }

    /// Get the number of frames in the message.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the message has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Get a reference to the frames without consuming the builder.
    #[must_use]
    pub fn frames(&self) -> &[Bytes] {
        &self.frames
    }

    /// Consume the builder and return the frames ready for sending.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Create a message from existing frames.
    #[must_use]
    pub const fn from_frames(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self::from_frames(frames)
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.into_frames()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_message() {
        let msg = Message::new();
        assert_eq!(msg.len(), 0);
        assert!(msg.is_empty());
    }

    #[test]
    fn test_build_message() {
        let msg = Message::new()
            .push_str("topic")
            .push(Vec::from(&b"payload"[..]));

        assert_eq!(msg.len(), 2);
        let frames = msg.into_frames();
        assert_eq!(frames[0], Bytes::from_static(b"topic"));
        assert_eq!(frames[1], Bytes::from_static(b"payload"));
    }

    #[test]
    fn test_sub_range_frame() {
        let backing = Bytes::from_static(b"0123456789");
        let msg = Message::new().push(backing.slice(2..6));
        assert_eq!(msg.frames()[0], Bytes::from_static(b"2345"));
    }

    #[test]
    fn test_from_frames() {
        let frames = vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")];
        let msg = Message::from_frames(frames.clone());
        assert_eq!(msg.len(), 2);
        assert_eq!(msg.frames(), &frames[..]);
    }
}
