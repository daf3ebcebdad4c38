//! A thread-safe free-list pool for short-lived, frequently allocated
//! values on the hot path (risk check results, risk events).
//!
//! Simpler than a lock-free tagged-pointer pool: one `Mutex<Vec<T>>`
//! guards the free list, and a miss just allocates. Under the
//! contention levels a risk engine sees (one evaluator core per
//! symbol shard, not a shared hot counter), the mutex never becomes the
//! bottleneck the lock-free version exists to avoid.

use parking_lot::Mutex;

/// Resets a pooled value to a fresh, reusable state before it is handed
/// back out.
pub trait Resettable {
    /// Restore `self` to the state a freshly constructed value would
    /// have.
    fn reset(&mut self);
}

/// A bounded free list of `T`, falling back to fresh allocation when
/// empty.
pub struct ObjectPool<T: Resettable + Default> {
    free: Mutex<Vec<T>>,
    capacity: usize,
}

impl<T: Resettable + Default> ObjectPool<T> {
    /// A pool that retains at most `capacity` returned values.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Take a value from the free list, or allocate a fresh
    /// [`Default`] one if the list is empty.
    pub fn acquire(&self) -> T {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Reset and return `value` to the pool. Dropped instead if the
    /// pool is already at `capacity`.
    pub fn release(&self, mut value: T) {
        value.reset();
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(value);
        }
    }

    /// Number of values currently held in the free list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.lock().len()
    }

    /// Whether the free list is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Scratch {
        value: u64,
    }

    impl Resettable for Scratch {
        fn reset(&mut self) {
            self.value = 0;
        }
    }

    #[test]
    fn acquire_on_empty_pool_allocates_default() {
        let pool: ObjectPool<Scratch> = ObjectPool::new(4);
        let scratch = pool.acquire();
        assert_eq!(scratch.value, 0);
    }

    #[test]
    fn release_then_acquire_reuses_and_resets() {
        let pool: ObjectPool<Scratch> = ObjectPool::new(4);
        let mut scratch = pool.acquire();
        scratch.value = 42;
        pool.release(scratch);
        assert_eq!(pool.len(), 1);
        let reused = pool.acquire();
        assert_eq!(reused.value, 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn release_beyond_capacity_is_dropped() {
        let pool: ObjectPool<Scratch> = ObjectPool::new(1);
        pool.release(Scratch { value: 1 });
        pool.release(Scratch { value: 2 });
        assert_eq!(pool.len(), 1);
    }
}
