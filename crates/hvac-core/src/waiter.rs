//! Per-RPC sync waiter: one allocated per in-flight request, matching
//! `hvac_sync_context` (`done`/`result`/mutex/condvar). The background
//! progress thread (see `transport`) signals it when the matching response
//! frame arrives; the calling thread blocks on it without holding any
//! shard or connection lock, so independent in-flight RPCs never serialize
//! behind each other.

use std::sync::{Condvar, Mutex};

pub struct Waiter<T> {
    slot: Mutex<Option<T>>,
    cond: Condvar,
}

impl<T> Default for Waiter<T> {
    fn default() -> Self {
        Self {
            slot: Mutex::new(None),
            cond: Condvar::new(),
        }
    }
}

impl<T> Waiter<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers the result and wakes every waiter. Idempotent in practice
    /// since each waiter is used for exactly one RPC.
    pub fn signal(&self, value: T) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(value);
        self.cond.notify_all();
    }

    /// Blocks until `signal` is called, with no deadline. Used for RPCs that
    /// always wait unconditionally (open, seek, stats).
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock().unwrap();
        loop {
            if let Some(v) = slot.take() {
                return v;
            }
            slot = self.cond.wait(slot).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_signaled() {
        let waiter: Arc<Waiter<i32>> = Arc::new(Waiter::new());
        let w = waiter.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            w.signal(42);
        });
        assert_eq!(waiter.wait(), 42);
        handle.join().unwrap();
    }
}
