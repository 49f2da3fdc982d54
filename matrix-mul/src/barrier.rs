//! Wait-for-N completion barrier.

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Releases waiters once `expected` arrivals have been recorded.
///
/// A barrier built with `expected == 0` is released from the start.
#[derive(Debug)]
pub struct CompletionBarrier {
    expected: usize,
    completed: AtomicUsize,
    released: Notify,
}

impl CompletionBarrier {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            completed: AtomicUsize::new(0),
            released: Notify::new(),
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire).min(self.expected)
    }

    pub fn is_released(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.expected
    }

    /// Records one completion. Returns `true` for the arrival that released
    /// the barrier and `false` for every other one.
    pub fn arrive(&self) -> bool {
        self.arrive_many(1)
    }

    /// Records `n` completions at once.
    pub fn arrive_many(&self, n: usize) -> bool {
        if n == 0 {
            return false;
        }
        let before = self.completed.fetch_add(n, Ordering::AcqRel);
        let fired = before < self.expected && before + n >= self.expected;
        if fired {
            self.released.notify_waiters();
        }
        fired
    }

    /// Waits until every expected completion has been recorded.
    pub async fn wait(&self) {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}
