//! Counting semaphore capping concurrent access to the remote raw-data host.
//!
//! `Mutex + Condvar` from std, blocking; callers are plain worker threads.

use std::sync::{Condvar, Mutex, PoisonError};

/// A counting semaphore that limits concurrent access to a shared resource.
pub struct Semaphore {
    state: Mutex<usize>,
    cond: Condvar,
}

/// RAII guard that releases one permit on drop.
pub struct SemaphoreGuard<'a>(&'a Semaphore);

impl Semaphore {
    /// Create a semaphore with `permits` initial permits (at least one).
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(permits.max(1)),
            cond: Condvar::new(),
        }
    }

    /// Block until a permit is available, then acquire it.
    pub fn acquire(&self) -> SemaphoreGuard<'_> {
        // A poisoned counter is still a valid count
        let mut count = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
        SemaphoreGuard(self)
    }

    /// Permits currently free.
    pub fn available(&self) -> usize {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.0.state.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        self.0.cond.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn acquire_and_release() {
        let sem = Semaphore::new(2);
        let g1 = sem.acquire();
        let _g2 = sem.acquire();
        assert_eq!(sem.available(), 0);
        drop(g1);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn zero_permits_clamped_to_one() {
        let sem = Semaphore::new(0);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn never_exceeds_permits() {
        let sem = Arc::new(Semaphore::new(2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let (sem, active, peak) = (sem.clone(), active.clone(), peak.clone());
                std::thread::spawn(move || {
                    let _g = sem.acquire();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(sem.available(), 2);
    }
}
