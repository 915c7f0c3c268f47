//! Page buffer allocator: slab -> arena -> heap.
//!
//! Recycles page-sized buffers through a capped free list (the slab tier)
//! so the cache doesn't round-trip through the global allocator on every
//! fetch/evict cycle. When the slab runs dry, a batch of fresh buffers is
//! pulled from the heap at once (the arena tier) up to a configured
//! ceiling; beyond that ceiling, allocation falls back to one-off heap
//! buffers that are never recycled into the slab.

use std::sync::Mutex;

const DEFAULT_ARENA_BATCH: usize = 32;

struct Inner {
    free: Vec<Vec<u8>>,
    page_size: usize,
    arena_batch: usize,
    arena_budget: usize,
    arena_allocated: usize,
    slab_hits: u64,
    arena_refills: u64,
    heap_overflow: u64,
}

/// Allocates and recycles page-sized buffers for the page cache.
pub struct PageAllocator {
    inner: Mutex<Inner>,
}

impl PageAllocator {
    /// `arena_budget` caps how many buffers the arena tier will ever hand
    /// out and recycle. Beyond it every allocation is a one-off heap buffer
    /// that's dropped (not pooled) on free.
    pub fn new(page_size: usize, arena_budget: usize) -> Self {
        PageAllocator {
            inner: Mutex::new(Inner {
                free: Vec::new(),
                page_size,
                arena_batch: DEFAULT_ARENA_BATCH.min(arena_budget.max(1)),
                arena_budget,
                arena_allocated: 0,
                slab_hits: 0,
                arena_refills: 0,
                heap_overflow: 0,
            }),
        }
    }

    /// Takes a zeroed page-sized buffer, preferring the recycled slab.
    pub fn alloc(&self) -> Vec<u8> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(mut buf) = inner.free.pop() {
            inner.slab_hits += 1;
            buf.iter_mut().for_each(|b| *b = 0);
            return buf;
        }

        let page_size = inner.page_size;

        if inner.arena_allocated < inner.arena_budget {
            let batch = inner.arena_batch.min(inner.arena_budget - inner.arena_allocated);
            inner.arena_refills += 1;
            // One buffer goes out immediately; the rest seed the free list.
            for _ in 0..batch.saturating_sub(1) {
                inner.free.push(vec![0u8; page_size]);
            }
            inner.arena_allocated += batch;
            return vec![0u8; page_size];
        }

        inner.heap_overflow += 1;
        vec![0u8; page_size]
    }

    /// Returns a buffer for reuse. Buffers of the wrong size, or arriving
    /// once the arena ceiling's recycling capacity is already full, are
    /// simply dropped instead of pooled.
    pub fn free(&self, buf: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        if buf.len() != inner.page_size {
            return;
        }
        if inner.free.len() < inner.arena_allocated {
            inner.free.push(buf);
        }
    }

    pub fn page_size(&self) -> usize {
        self.inner.lock().unwrap().page_size
    }

    pub fn stats(&self) -> PageAllocatorStats {
        let inner = self.inner.lock().unwrap();
        PageAllocatorStats {
            slab_hits: inner.slab_hits,
            arena_refills: inner.arena_refills,
            heap_overflow: inner.heap_overflow,
            arena_allocated: inner.arena_allocated,
            free_count: inner.free.len(),
        }
    }
}

/// Point-in-time counters for diagnosing allocator pressure.
#[derive(Debug, Clone, Copy)]
pub struct PageAllocatorStats {
    pub slab_hits: u64,
    pub arena_refills: u64,
    pub heap_overflow: u64,
    pub arena_allocated: usize,
    pub free_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_alloc_triggers_an_arena_refill() {
        let alloc = PageAllocator::new(1024, 8);
        let buf = alloc.alloc();
        assert_eq!(buf.len(), 1024);
        let stats = alloc.stats();
        assert_eq!(stats.arena_refills, 1);
        assert_eq!(stats.arena_allocated, 8);
        assert_eq!(stats.free_count, 7);
    }

    #[test]
    fn freed_buffer_is_recycled_from_the_slab() {
        let alloc = PageAllocator::new(1024, 4);
        let buf = alloc.alloc();
        alloc.free(buf);

        let buf2 = alloc.alloc();
        assert_eq!(buf2.len(), 1024);
        assert!(alloc.stats().slab_hits >= 1);
    }

    #[test]
    fn recycled_buffer_is_zeroed() {
        let alloc = PageAllocator::new(16, 2);
        let mut buf = alloc.alloc();
        buf.fill(0xAA);
        alloc.free(buf);

        let buf2 = alloc.alloc();
        assert!(buf2.iter().all(|&b| b == 0));
    }

    #[test]
    fn exceeding_arena_budget_falls_back_to_heap() {
        let alloc = PageAllocator::new(64, 1);
        let b1 = alloc.alloc(); // fills the single-buffer arena budget
        let b2 = alloc.alloc(); // arena exhausted, falls to heap
        assert_eq!(b1.len(), 64);
        assert_eq!(b2.len(), 64);
        assert_eq!(alloc.stats().heap_overflow, 1);
    }

    #[test]
    fn wrong_sized_buffer_is_not_pooled() {
        let alloc = PageAllocator::new(1024, 4);
        alloc.free(vec![0u8; 512]);
        assert_eq!(alloc.stats().free_count, 0);
    }
}
