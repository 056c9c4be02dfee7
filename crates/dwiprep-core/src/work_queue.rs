//! FIFO work queue shared by a fixed set of dispatcher workers

use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free queue handing out items in submission order.
///
/// Each worker calls [`next()`](WorkQueue::next) to claim the next item;
/// the atomic cursor guarantees every item is claimed exactly once and
/// that claims happen in FIFO order.
pub struct WorkQueue<S> {
    items: Vec<S>,
    cursor: AtomicUsize,
}

impl<S> WorkQueue<S> {
    pub fn new(items: Vec<S>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Claim the next item. Returns `None` once the queue is drained.
    pub fn next(&self) -> Option<&S> {
        let i = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.items.get(i)
    }

    /// Total items submitted
    pub fn total(&self) -> usize {
        self.items.len()
    }

    /// Items never handed out (non-zero only when workers stopped early).
    pub fn unclaimed(&self) -> &[S] {
        let claimed = self.cursor.load(Ordering::SeqCst).min(self.items.len());
        &self.items[claimed..]
    }
}
