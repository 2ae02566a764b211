//! Size-class-bucketed pool of reusable byte buffers.
//!
//! The receive hot path rents a buffer per incoming frame instead of
//! allocating; the application returns buffers after draining a delivered
//! message. Buckets cover three size classes (tiny / small / large) and
//! keep a bounded number of free buffers each. Bucket depth limits are a
//! reuse optimization, not a hard cap: when a bucket is empty, `rent`
//! falls back to a fresh allocation, and when it is full, `give` simply
//! drops the buffer.
//!
//! A [`PooledBuf`] owns its bytes, so returning it moves it back into the
//! pool: double-return and use-after-return are unrepresentable. A buffer
//! that is never returned is deallocated normally when dropped, degrading
//! the pool to plain allocation rather than causing a fault.

use bytes::BytesMut;
use parking_lot::Mutex;

/// One bucket configuration: buffer capacity and how many free buffers to
/// keep around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClass {
    /// Byte capacity of every buffer in this class
    pub capacity: usize,
    /// Maximum number of returned buffers retained for reuse
    pub depth: usize,
}

/// Default size classes: tiny frames (topic bytes, headers), typical
/// payloads, and bulk payloads up to 64 KiB.
pub const DEFAULT_CLASSES: [SizeClass; 3] = [
    SizeClass { capacity: 256, depth: 64 },
    SizeClass { capacity: 4096, depth: 32 },
    SizeClass { capacity: 65536, depth: 16 },
];

/// A byte buffer checked out from a [`BufferPool`].
///
/// Owned by exactly one holder at a time; give it back with
/// [`BufferPool::give`] to make it available for the next rent.
#[derive(Debug)]
pub struct PooledBuf {
    data: BytesMut,
    class: Option<usize>,
}

impl PooledBuf {
    /// Number of bytes written into the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total capacity of the underlying allocation.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// View the written bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Append bytes, growing the allocation if the class capacity is
    /// exceeded.
    pub fn extend_from_slice(&mut self, src: &[u8]) {
        self.data.extend_from_slice(src);
    }

    /// Discard the written bytes, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// A size-class-bucketed buffer pool.
///
/// Never raises application-visible errors: bucket starvation degrades to
/// ordinary allocation.
#[derive(Debug)]
pub struct BufferPool {
    buckets: Vec<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    class: SizeClass,
    free: Mutex<Vec<BytesMut>>,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferPool {
    /// Create a pool with the default size classes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_classes(&DEFAULT_CLASSES)
    }

    /// Create a pool with custom size classes.
    ///
    /// Classes are sorted by capacity; duplicates are collapsed.
    #[must_use]
    pub fn with_classes(classes: &[SizeClass]) -> Self {
        let mut classes: Vec<SizeClass> = classes.to_vec();
        classes.sort_by_key(|c| c.capacity);
        classes.dedup_by_key(|c| c.capacity);
        Self {
            buckets: classes
                .into_iter()
                .map(|class| Bucket {
                    class,
                    free: Mutex::new(Vec::new()),
                })
                .collect(),
        }
    }

    /// Rent a buffer with capacity of at least `minimum_size` bytes.
    ///
    /// The request is rounded up to the nearest size class; requests larger
    /// than every class get an exact-size unpooled buffer.
    #[must_use]
    pub fn rent(&self, minimum_size: usize) -> PooledBuf {
        for (idx, bucket) in self.buckets.iter().enumerate() {
            if bucket.class.capacity >= minimum_size {
                let reused = bucket.free.lock().pop();
                let data = reused
                    .unwrap_or_else(|| BytesMut::with_capacity(bucket.class.capacity));
                return PooledBuf {
                    data,
                    class: Some(idx),
                };
            }
        }
        // Larger than every class: plain allocation, not pooled on return.
        PooledBuf {
            data: BytesMut::with_capacity(minimum_size),
            class: None,
        }
    }

    /// Rent a buffer and fill it with a copy of `src`.
    #[must_use]
    pub fn rent_filled(&self, src: &[u8]) -> PooledBuf {
        let mut buf = self.rent(src.len());
        buf.extend_from_slice(src);
        buf
    }

    /// Return a previously rented buffer to its class bucket.
    ///
    /// If the bucket is already at its configured depth, the buffer is
    /// dropped instead of pooled. Oversize buffers are always dropped.
    pub fn give(&self, buf: PooledBuf) {
        let PooledBuf { mut data, class } = buf;
        let Some(idx) = class else { return };
        data.clear();
        let bucket = &self.buckets[idx];
        let mut free = bucket.free.lock();
        if free.len() < bucket.class.depth {
            free.push(data);
        }
    }

    /// Number of free buffers currently pooled in the class covering
    /// `size`. Mostly useful for diagnostics.
    #[must_use]
    pub fn pooled_count(&self, size: usize) -> usize {
        self.buckets
            .iter()
            .find(|b| b.class.capacity >= size)
            .map_or(0, |b| b.free.lock().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_capacity() {
        let pool = BufferPool::new();
        assert!(pool.rent(1).capacity() >= 1);
        assert!(pool.rent(256).capacity() >= 256);
        assert!(pool.rent(257).capacity() >= 257);
        assert!(pool.rent(65536).capacity() >= 65536);
        // Oversize request still succeeds, unpooled
        assert!(pool.rent(1 << 20).capacity() >= 1 << 20);
    }

    #[test]
    fn test_reuse_by_identity() {
        let pool = BufferPool::new();
        let mut buf = pool.rent(100);
        buf.extend_from_slice(b"hello");
        let ptr = buf.as_slice().as_ptr();

        pool.give(buf);
        let again = pool.rent(100);
        assert_eq!(again.len(), 0, "returned buffer must come back cleared");
        assert_eq!(ptr, again.data.as_ptr(), "same allocation must be reused");
    }

    #[test]
    fn test_depth_cap() {
        let pool = BufferPool::with_classes(&[SizeClass { capacity: 64, depth: 2 }]);
        let bufs: Vec<_> = (0..5).map(|_| pool.rent(16)).collect();
        for buf in bufs {
            pool.give(buf);
        }
        assert_eq!(pool.pooled_count(16), 2);
    }

    #[test]
    fn test_oversize_not_pooled() {
        let pool = BufferPool::with_classes(&[SizeClass { capacity: 64, depth: 8 }]);
        let buf = pool.rent(1000);
        pool.give(buf);
        assert_eq!(pool.pooled_count(16), 0);
    }

    #[test]
    fn test_rent_filled() {
        let pool = BufferPool::new();
        let buf = pool.rent_filled(b"payload");
        assert_eq!(buf.as_slice(), b"payload");
        assert_eq!(buf.len(), 7);
    }
}
