//! Lock-free, size-classed buffer pool.
//!
//! Buffers are kept in one `crossbeam_queue::ArrayQueue` per size class.
//! A request is served from the smallest class that fits; requests above the
//! largest class are allocated exactly and never pooled. Handles return their
//! buffer on drop, so every exit path of a forwarding loop releases it.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crossbeam_queue::ArrayQueue;

use crate::defaults::DEFAULT_POOL_CLASS_CAPACITY;

/// Buffer sizes the pool keeps, smallest first.
pub const SIZE_CLASSES: [usize; 8] = [512, 1024, 2048, 4096, 8192, 16384, 32768, 65536];

/// Counters describing pool efficiency.
#[derive(Debug, Default)]
pub struct BufferPoolStats {
    allocations: AtomicU64,
    reuses: AtomicU64,
    returns: AtomicU64,
    drops: AtomicU64,
}

impl BufferPoolStats {
    /// Buffers freshly allocated because the class was empty (or oversize).
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Buffers served from a class queue.
    pub fn reuses(&self) -> u64 {
        self.reuses.load(Ordering::Relaxed)
    }

    /// Buffers put back into a class queue.
    pub fn returns(&self) -> u64 {
        self.returns.load(Ordering::Relaxed)
    }

    /// Buffers freed because their class queue was full or they were oversize.
    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// `reuses / (reuses + allocations)`, or 0.0 before any request.
    pub fn efficiency(&self) -> f64 {
        let reuses = self.reuses();
        let total = reuses + self.allocations();
        if total == 0 {
            0.0
        } else {
            reuses as f64 / total as f64
        }
    }
}

struct SizeClass {
    size: usize,
    queue: ArrayQueue<Vec<u8>>,
}

/// Shared pool of reusable byte buffers.
pub struct BufferPool {
    classes: Vec<SizeClass>,
    stats: BufferPoolStats,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &SIZE_CLASSES)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BufferPool {
    /// Create a pool keeping at most `per_class` idle buffers in each class.
    pub fn new(per_class: usize) -> Self {
        let per_class = per_class.max(1);
        Self {
            classes: SIZE_CLASSES
                .iter()
                .map(|&size| SizeClass {
                    size,
                    queue: ArrayQueue::new(per_class),
                })
                .collect(),
            stats: BufferPoolStats::default(),
        }
    }

    /// Borrow a buffer of exactly `len` usable bytes.
    ///
    /// Contents of a reused buffer are whatever the previous holder left;
    /// callers only read back what they have written.
    pub fn get(self: &Arc<Self>, len: usize) -> PooledBuffer {
        let class = self.classes.iter().position(|c| c.size >= len);
        let buf = match class {
            Some(idx) => match self.classes[idx].queue.pop() {
                Some(buf) => {
                    self.stats.reuses.fetch_add(1, Ordering::Relaxed);
                    buf
                }
                None => {
                    self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                    vec![0u8; self.classes[idx].size]
                }
            },
            None => {
                self.stats.allocations.fetch_add(1, Ordering::Relaxed);
                vec![0u8; len]
            }
        };
        PooledBuffer {
            buf: Some(buf),
            len,
            class,
            pool: Arc::clone(self),
        }
    }

    pub fn stats(&self) -> &BufferPoolStats {
        &self.stats
    }

    /// Idle buffers currently held across all classes.
    pub fn idle(&self) -> usize {
        self.classes.iter().map(|c| c.queue.len()).sum()
    }

    fn put(&self, class: Option<usize>, buf: Vec<u8>) {
        let Some(idx) = class else {
            self.stats.drops.fetch_add(1, Ordering::Relaxed);
            return;
        };
        match self.classes[idx].queue.push(buf) {
            Ok(()) => {
                self.stats.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CLASS_CAPACITY)
    }
}

/// Process-wide pool shared by every relay session.
pub fn global_pool() -> &'static Arc<BufferPool> {
    static POOL: OnceLock<Arc<BufferPool>> = OnceLock::new();
    POOL.get_or_init(|| Arc::new(BufferPool::default()))
}

/// RAII handle to a pooled buffer. Derefs to exactly the requested length.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    len: usize,
    class: Option<usize>,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.buf {
            Some(buf) => &buf[..self.len],
            None => &[],
        }
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.buf {
            Some(buf) => &mut buf[..self.len],
            None => &mut [],
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(self.class, buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_rounds_up_to_class() {
        let pool = Arc::new(BufferPool::new(4));
        let buf = pool.get(1500);
        assert_eq!(buf.len(), 1500);
        drop(buf);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.stats().allocations(), 1);
        assert_eq!(pool.stats().returns(), 1);
    }

    #[test]
    fn test_reuse_same_class() {
        let pool = Arc::new(BufferPool::new(4));
        drop(pool.get(1500));
        let again = pool.get(2000);
        assert_eq!(again.len(), 2000);
        assert_eq!(pool.stats().reuses(), 1);
        assert_eq!(pool.stats().allocations(), 1);
        assert!(pool.stats().efficiency() > 0.0);
    }

    #[test]
    fn test_oversize_not_pooled() {
        let pool = Arc::new(BufferPool::new(4));
        let big = pool.get(100_000);
        assert_eq!(big.len(), 100_000);
        drop(big);
        assert_eq!(pool.idle(), 0);
        assert_eq!(pool.stats().drops(), 1);
    }

    #[test]
    fn test_full_class_drops_extra() {
        let pool = Arc::new(BufferPool::new(1));
        let a = pool.get(512);
        let b = pool.get(512);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.stats().drops(), 1);
    }

    #[test]
    fn test_reuse_does_not_leak_between_holders() {
        let pool = Arc::new(BufferPool::new(2));
        let mut first = pool.get(8);
        first.copy_from_slice(b"AAAAAAAA");
        let mut second = pool.get(8);
        second.copy_from_slice(b"BBBBBBBB");
        assert_eq!(&first[..], b"AAAAAAAA");
        assert_eq!(&second[..], b"BBBBBBBB");
        drop(first);

        let mut third = pool.get(4);
        third.copy_from_slice(b"CCCC");
        assert_eq!(&third[..], b"CCCC");
        assert_eq!(&second[..], b"BBBBBBBB");
    }

    #[test]
    fn test_concurrent_get_put() {
        let pool = Arc::new(BufferPool::new(8));
        let handles: Vec<_> = (0..8u8)
            .map(|id| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let mut buf = pool.get(1024);
                        buf.fill(id);
                        assert!(buf.iter().all(|&b| b == id));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle() <= 8);
    }
}
