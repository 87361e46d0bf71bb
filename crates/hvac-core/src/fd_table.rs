//! Sharded FD state table: one `RwLock<HashMap<...>>` per shard plus a
//! per-entry mutex/condvar, grounded on `hvac_fd_status`/`fd_state_map`'s
//! 64-way sharded `pthread_rwlock_t` array. The entry's own condvar, not
//! the shard lock, is what readers block on, so a slow open on one fd never
//! blocks lookups for unrelated fds in the same shard.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::{Duration, Instant};

const SHARDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdState {
    Opening,
    Ready,
    Error,
}

pub struct FdEntry {
    pub fd: i32,
    pub path: String,
    state: Mutex<FdState>,
    cond: Condvar,
    remote_fd: AtomicI32,
}

impl FdEntry {
    fn new(fd: i32, path: String) -> Self {
        Self {
            fd,
            path,
            state: Mutex::new(FdState::Opening),
            cond: Condvar::new(),
            remote_fd: AtomicI32::new(-1),
        }
    }

    pub fn remote_fd(&self) -> i32 {
        self.remote_fd.load(Ordering::Acquire)
    }

    pub fn state(&self) -> FdState {
        *self.state.lock().unwrap()
    }

    /// Never regresses: once `Ready` or `Error`, later calls are no-ops.
    pub fn set_ready(&self, remote_fd: i32) {
        let mut state = self.state.lock().unwrap();
        if *state == FdState::Opening {
            self.remote_fd.store(remote_fd, Ordering::Release);
            *state = FdState::Ready;
            self.cond.notify_all();
            tracing::debug!(fd = self.fd, remote_fd, path = %self.path, "fd ready");
        }
    }

    pub fn set_error(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == FdState::Opening {
            *state = FdState::Error;
            self.cond.notify_all();
            tracing::debug!(fd = self.fd, path = %self.path, "fd entered error state");
        }
    }

    /// Blocks up to `timeout` for the state to leave `Opening`. Returns
    /// `true` only if the terminal state is `Ready`.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while *state == FdState::Opening {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self.cond.wait_timeout(state, deadline - now).unwrap();
            state = guard;
            if result.timed_out() && *state == FdState::Opening {
                return false;
            }
        }
        *state == FdState::Ready
    }
}

pub struct FdTable {
    shards: Vec<RwLock<HashMap<i32, Arc<FdEntry>>>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        let mut shards = Vec::with_capacity(SHARDS);
        for _ in 0..SHARDS {
            shards.push(RwLock::new(HashMap::new()));
        }
        Self { shards }
    }

    fn shard(&self, fd: i32) -> &RwLock<HashMap<i32, Arc<FdEntry>>> {
        &self.shards[(fd as usize) % SHARDS]
    }

    /// Registers `fd` as `Opening` and returns its entry. Overwrites any
    /// stale entry left behind by a prior close for a reused fd number.
    pub fn insert_opening(&self, fd: i32, path: String) -> Arc<FdEntry> {
        let entry = Arc::new(FdEntry::new(fd, path));
        self.shard(fd).write().unwrap().insert(fd, entry.clone());
        entry
    }

    pub fn get(&self, fd: i32) -> Option<Arc<FdEntry>> {
        self.shard(fd).read().unwrap().get(&fd).cloned()
    }

    pub fn remove(&self, fd: i32) -> Option<Arc<FdEntry>> {
        self.shard(fd).write().unwrap().remove(&fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn ready_transition_is_observed_by_waiter() {
        let table = FdTable::new();
        let entry = table.insert_opening(3, "/data/f".into());
        let e2 = entry.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            e2.set_ready(42);
        });
        assert!(entry.wait_ready(Duration::from_secs(2)));
        assert_eq!(entry.remote_fd(), 42);
    }

    #[test]
    fn error_transition_fails_wait() {
        let table = FdTable::new();
        let entry = table.insert_opening(3, "/data/f".into());
        entry.set_error();
        assert!(!entry.wait_ready(Duration::from_secs(1)));
    }

    #[test]
    fn wait_times_out_while_still_opening() {
        let table = FdTable::new();
        let entry = table.insert_opening(3, "/data/f".into());
        assert!(!entry.wait_ready(Duration::from_millis(20)));
    }

    #[test]
    fn state_never_regresses_after_terminal() {
        let table = FdTable::new();
        let entry = table.insert_opening(3, "/data/f".into());
        entry.set_ready(1);
        entry.set_error();
        assert_eq!(entry.state(), FdState::Ready);
        assert_eq!(entry.remote_fd(), 1);
    }

    #[test]
    fn remove_drops_entry() {
        let table = FdTable::new();
        table.insert_opening(5, "/data/g".into());
        assert!(table.get(5).is_some());
        table.remove(5);
        assert!(table.get(5).is_none());
    }

    #[test]
    fn different_fds_in_same_shard_do_not_block_each_other() {
        let table = FdTable::new();
        let a = table.insert_opening(0, "/a".into());
        let b = table.insert_opening(64, "/b".into()); // same shard as 0
        b.set_ready(9);
        assert!(b.wait_ready(Duration::from_millis(50)));
        assert!(!a.wait_ready(Duration::from_millis(20)));
    }
}
