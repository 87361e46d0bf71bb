//! Shared test-only helpers. `std::env::set_current_dir` is process-global,
//! so every test that depends on the rendezvous file's default cwd-relative
//! path serializes on this lock.
use std::sync::Mutex;

pub(crate) static CWD_LOCK: Mutex<()> = Mutex::new(());
