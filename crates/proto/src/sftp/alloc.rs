//! Fixed-size page allocator.
//!
//! An optional bounded pool of byte pages reused across inbound request
//! buffers and outbound data payloads, keeping memory flat under bursty
//! pipelining. Disabled by default; sessions that want it size pages at the
//! negotiated maximum packet size so any frame fits one page.
//!
//! The free list only ever grows to its high-water mark during a session;
//! [`PagePool::drain`] releases everything at session end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A page borrowed from a [`PagePool`].
///
/// The stamp identifies this borrow; returning a page twice is detected by
/// the pool and ignored.
#[derive(Debug)]
pub struct Page {
    buf: Vec<u8>,
    stamp: u64,
}

impl Page {
    /// The borrow stamp.
    pub fn stamp(&self) -> u64 {
        self.stamp
    }

    /// The page contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The page contents, writable.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: HashSet<u64>,
}

/// Pool of fixed-size pages.
///
/// `acquire` is an O(1) pop with allocate-on-exhaustion; `release` is an
/// O(1) push. The lock is held only across list manipulation.
#[derive(Debug, Clone)]
pub struct PagePool {
    state: Arc<Mutex<PoolState>>,
    page_size: usize,
    next_stamp: Arc<AtomicU64>,
}

impl PagePool {
    /// Creates a pool of `page_size`-byte pages.
    pub fn new(page_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState::default())),
            page_size,
            next_stamp: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Borrows a page, allocating a fresh one when the free list is empty.
    pub fn acquire(&self) -> Page {
        let stamp = self.next_stamp.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock().expect("page pool lock poisoned");
        let buf = state
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; self.page_size]);
        state.outstanding.insert(stamp);
        Page { buf, stamp }
    }

    /// Returns a page to the free list.
    ///
    /// A page whose stamp is not outstanding was already returned; the
    /// duplicate is dropped and logged rather than corrupting the list.
    pub fn release(&self, page: Page) {
        let mut state = self.state.lock().expect("page pool lock poisoned");
        if !state.outstanding.remove(&page.stamp) {
            warn!(stamp = page.stamp, "double return of allocator page ignored");
            return;
        }
        let mut buf = page.buf;
        if buf.len() != self.page_size {
            // A borrower shrank the buffer; restore the invariant.
            buf.resize(self.page_size, 0);
        }
        state.free.push(buf);
    }

    /// Pages currently borrowed.
    pub fn used_pages(&self) -> usize {
        self.state
            .lock()
            .expect("page pool lock poisoned")
            .outstanding
            .len()
    }

    /// Pages sitting on the free list.
    pub fn available_pages(&self) -> usize {
        self.state
            .lock()
            .expect("page pool lock poisoned")
            .free
            .len()
    }

    /// Frees every pooled page. Called at session end; outstanding borrows
    /// simply drop their buffers when released afterwards.
    pub fn drain(&self) {
        let mut state = self.state.lock().expect("page pool lock poisoned");
        let freed = state.free.len();
        state.free.clear();
        state.outstanding.clear();
        debug!(freed, "page pool drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_release_counters() {
        let pool = PagePool::new(1024);
        assert_eq!(pool.used_pages(), 0);
        assert_eq!(pool.available_pages(), 0);

        let a = pool.acquire();
        let b = pool.acquire();
        assert_eq!(pool.used_pages(), 2);
        assert_eq!(pool.available_pages(), 0);

        pool.release(a);
        assert_eq!(pool.used_pages(), 1);
        assert_eq!(pool.available_pages(), 1);

        pool.release(b);
        assert_eq!(pool.used_pages(), 0);
        assert_eq!(pool.available_pages(), 2);
    }

    #[test]
    fn test_pages_are_reused() {
        let pool = PagePool::new(64);
        let page = pool.acquire();
        pool.release(page);
        let _page = pool.acquire();
        // The freed page came back off the list rather than a new allocation.
        assert_eq!(pool.available_pages(), 0);
    }

    #[test]
    fn test_double_release_is_ignored() {
        let pool = PagePool::new(64);
        let page = pool.acquire();
        let stamp = page.stamp();
        pool.release(page);

        // Forge the same stamp; the pool must not grow its free list twice.
        let forged = Page {
            buf: vec![0u8; 64],
            stamp,
        };
        pool.release(forged);
        assert_eq!(pool.available_pages(), 1);
        assert_eq!(pool.used_pages(), 0);
    }

    #[test]
    fn test_drain_empties_both_lists() {
        let pool = PagePool::new(64);
        let a = pool.acquire();
        pool.release(a);
        let _held = pool.acquire();
        pool.drain();
        assert_eq!(pool.available_pages(), 0);
        assert_eq!(pool.used_pages(), 0);
    }

    #[test]
    fn test_shrunk_page_restored_on_release() {
        let pool = PagePool::new(64);
        let mut page = pool.acquire();
        page.buf.truncate(8);
        pool.release(page);
        let page = pool.acquire();
        assert_eq!(page.as_slice().len(), 64);
    }
}
