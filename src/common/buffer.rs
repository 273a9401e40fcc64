//! # Buffer pool
//!
//! A bounded pool of reusable byte buffers (§4.3), grounded in the
//! `Buffer<char>` / pooled-allocation pattern used throughout
//! `original_source/process/runtime` (invocation payloads are checked out
//! of a pool, filled, handed to a worker, and returned once consumed rather
//! than allocated and freed per invocation).
//!
//! Buffers are move-only: `retrieve` hands out ownership, `give_back`
//! reclaims it. There is no handle wrapper with a `Drop` impl that
//! auto-returns, matching the original's explicit return-to-pool call
//! (an invocation's payload buffer outlives the call that retrieved it,
//! so an RAII guard would fight the worker's own ownership transfer).

use std::collections::VecDeque;

/// A single pooled buffer. `len` is the logical amount of valid data;
/// `data.capacity()` is what the pool remembers when deciding whether a
/// returned buffer is worth keeping.
#[derive(Debug, Clone)]
pub struct Buffer {
    data: Vec<u8>,
}

impl Buffer {
    fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn clear(&mut self) {
        self.data.clear();
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Buffer { data }
    }
}

/// Bounded pool of reusable buffers. `max_buffers` caps how many idle
/// buffers are retained; returns past the cap are simply dropped rather
/// than erroring, matching the original's best-effort pooling (a pool miss
/// just means a fresh allocation next time).
pub struct BufferPool {
    idle: VecDeque<Buffer>,
    max_buffers: usize,
    default_capacity: usize,
}

impl BufferPool {
    pub fn new(max_buffers: usize, default_capacity: usize) -> Self {
        BufferPool {
            idle: VecDeque::with_capacity(max_buffers),
            max_buffers,
            default_capacity,
        }
    }

    /// Checks out a buffer with at least `size` bytes of capacity, reusing
    /// an idle one if one is large enough, else allocating fresh.
    pub fn retrieve(&mut self, size: usize) -> Buffer {
        if let Some(pos) = self.idle.iter().position(|b| b.capacity() >= size) {
            let mut buf = self.idle.remove(pos).expect("position was just found");
            buf.clear();
            return buf;
        }
        Buffer::with_capacity(size.max(self.default_capacity))
    }

    /// Returns a buffer to the pool for reuse, subject to the pool's cap.
    pub fn give_back(&mut self, mut buf: Buffer) {
        if self.idle.len() >= self.max_buffers {
            return;
        }
        buf.clear();
        self.idle.push_back(buf);
    }

    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retrieve_reuses_idle_buffer_of_sufficient_capacity() {
        let mut pool = BufferPool::new(4, 16);
        let buf = pool.retrieve(64);
        assert_eq!(buf.capacity(), 64);
        pool.give_back(buf);
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.retrieve(32);
        assert_eq!(pool.idle_count(), 0);
        assert!(reused.capacity() >= 32);
    }

    #[test]
    fn returns_past_cap_are_dropped_not_queued() {
        let mut pool = BufferPool::new(1, 16);
        pool.give_back(Buffer::with_capacity(16));
        pool.give_back(Buffer::with_capacity(16));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn given_back_buffer_is_cleared() {
        let mut pool = BufferPool::new(2, 16);
        let mut buf = pool.retrieve(16);
        buf.as_mut_vec().extend_from_slice(b"hello");
        assert_eq!(buf.len(), 5);
        pool.give_back(buf);

        let recycled = pool.retrieve(16);
        assert!(recycled.is_empty());
    }
}
