//! Topic-prefix subscription state and the control-frame encoding the
//! connect side sends upstream.
//!
//! A subscription is a byte prefix matched against the first frame of
//! every message. The empty prefix matches everything; an empty *set*
//! matches nothing, so a socket that never subscribed receives nothing.

use bytes::Bytes;

/// Check whether `topic` starts with `prefix`. An empty prefix matches
/// every topic.
#[must_use]
pub fn prefix_matches(prefix: &[u8], topic: &[u8]) -> bool {
    topic.len() >= prefix.len() && topic[..prefix.len()] == *prefix
}

/// The set of topic prefixes one peer is subscribed to.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionSet {
    prefixes: Vec<Bytes>,
}

impl SubscriptionSet {
    /// Create an empty set (matches nothing).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prefixes: Vec::new(),
        }
    }

    /// Add a prefix. Duplicates are ignored.
    pub fn subscribe(&mut self, prefix: Bytes) {
        if !self.prefixes.contains(&prefix) {
            self.prefixes.push(prefix);
        }
    }

    /// Remove a prefix.
    pub fn unsubscribe(&mut self, prefix: &[u8]) {
        self.prefixes.retain(|p| p != prefix);
    }

    /// Check whether a message with the given topic frame should be
    /// delivered.
    #[must_use]
    pub fn matches(&self, topic: &[u8]) -> bool {
        self.prefixes.iter().any(|p| prefix_matches(p, topic))
    }

    /// Check if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// The current prefixes, for replay after a reconnect.
    #[must_use]
    pub fn prefixes(&self) -> &[Bytes] {
        &self.prefixes
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.prefixes.clear();
    }
}

/// Subscription control message exchanged between connect and bind sides.
///
/// Wire form: one frame of `[0x01|0x00]` followed by the prefix bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Start receiving messages whose topic starts with the prefix
    Subscribe(Bytes),
    /// Stop receiving messages for the prefix
    Unsubscribe(Bytes),
}

impl SubscriptionAction {
    const SUBSCRIBE: u8 = 0x01;
    const UNSUBSCRIBE: u8 = 0x00;

    /// Decode a control frame. Returns `None` for malformed input.
    #[must_use]
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let (&tag, prefix) = frame.split_first()?;
        let prefix = Bytes::copy_from_slice(prefix);
        match tag {
            Self::SUBSCRIBE => Some(Self::Subscribe(prefix)),
            Self::UNSUBSCRIBE => Some(Self::Unsubscribe(prefix)),
            _ => None,
        }
    }

    /// Encode this action as a control frame payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let (tag, prefix) = match self {
            Self::Subscribe(p) => (Self::SUBSCRIBE, p),
            Self::Unsubscribe(p) => (Self::UNSUBSCRIBE, p),
        };
        let mut out = Vec::with_capacity(1 + prefix.len());
        out.push(tag);
        out.extend_from_slice(prefix);
        Bytes::from(out)
    }

    /// The topic prefix this action refers to.
    #[must_use]
    pub const fn prefix(&self) -> &Bytes {
        match self {
            Self::Subscribe(p) | Self::Unsubscribe(p) => p,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matches() {
        assert!(prefix_matches(b"topic.", b"topic.foo"));
        assert!(!prefix_matches(b"topic.", b"other.foo"));
        assert!(!prefix_matches(b"topic.", b"topi"));
        // Empty prefix matches everything
        assert!(prefix_matches(b"", b"anything"));
        assert!(prefix_matches(b"", b""));
    }

    #[test]
    fn test_empty_set_matches_nothing() {
        let set = SubscriptionSet::new();
        assert!(!set.matches(b"topic"));
        assert!(!set.matches(b""));
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let mut set = SubscriptionSet::new();
        set.subscribe(Bytes::from_static(b"topic."));
        assert!(set.matches(b"topic.foo"));
        assert!(!set.matches(b"other"));

        // Duplicate subscribe is a no-op
        set.subscribe(Bytes::from_static(b"topic."));
        assert_eq!(set.len(), 1);

        set.unsubscribe(b"topic.");
        assert!(!set.matches(b"topic.foo"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_broadcast_prefix() {
        let mut set = SubscriptionSet::new();
        set.subscribe(Bytes::new());
        assert!(set.matches(b"anything"));
        assert!(set.matches(&[7u8]));
    }

    #[test]
    fn test_action_round_trip() {
        let sub = SubscriptionAction::Subscribe(Bytes::from_static(b"quotes"));
        let frame = sub.encode();
        assert_eq!(frame[0], 0x01);
        assert_eq!(&frame[1..], b"quotes");
        assert_eq!(SubscriptionAction::decode(&frame), Some(sub));

        let unsub = SubscriptionAction::Unsubscribe(Bytes::from_static(b"quotes"));
        let frame = unsub.encode();
        assert_eq!(frame[0], 0x00);
        assert_eq!(SubscriptionAction::decode(&frame), Some(unsub));
    }

    #[test]
    fn test_action_decode_malformed() {
        assert_eq!(SubscriptionAction::decode(&[]), None);
        assert_eq!(SubscriptionAction::decode(&[0x02, b'x']), None);
    }
}
