//! Deterministic path→server-rank sharding and address resolution.
//!
//! `std::hash::DefaultHasher`'s algorithm is explicitly unspecified and not a
//! cross-version guarantee, but shard selection is a wire contract every
//! client and server process must agree on. We use `twox-hash`'s `XxHash64`
//! with a fixed seed instead, which is stable across processes and Rust
//! versions by construction.
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::RwLock;

use twox_hash::XxHash64;

use crate::error::{HvacError, Result};

const HASH_SEED: u64 = 0;

/// Maps a canonical path to a server rank in `[0, server_count)`.
pub fn shard_for_path(path: &str, server_count: u32) -> u32 {
    assert!(server_count > 0, "server_count must be nonzero");
    let mut hasher = XxHash64::with_seed(HASH_SEED);
    hasher.write(path.as_bytes());
    (hasher.finish() % server_count as u64) as u32
}

/// In-memory cache over the rendezvous file: addresses never change for the
/// lifetime of a job, so once a rank resolves it is never looked up again.
pub struct AddrCache {
    job_id: String,
    cache: RwLock<HashMap<u32, String>>,
}

impl AddrCache {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves the listen address for `rank`, consulting the cache first
    /// and falling back to a rendezvous-file read on a miss.
    pub fn resolve(&self, rank: u32) -> Result<String> {
        if let Some(addr) = self.cache.read().unwrap().get(&rank) {
            return Ok(addr.clone());
        }

        tracing::debug!(rank, job_id = %self.job_id, "locator cache miss, reading rendezvous file");
        let addr = hvac_config::rendezvous::read_address(&self.job_id, rank)
            .map_err(|e| HvacError::Bootstrap(e.to_string()))?
            .ok_or_else(|| {
                tracing::warn!(rank, job_id = %self.job_id, "no rendezvous entry for rank");
                HvacError::Bootstrap(format!("no rendezvous entry for rank {rank}"))
            })?;

        self.cache
            .write()
            .unwrap()
            .insert(rank, addr.clone());
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_is_deterministic_and_in_range() {
        let a = shard_for_path("/data/foo.bin", 8);
        let b = shard_for_path("/data/foo.bin", 8);
        assert_eq!(a, b);
        assert!(a < 8);
    }

    #[test]
    fn shard_varies_with_path() {
        let a = shard_for_path("/data/foo.bin", 1024);
        let b = shard_for_path("/data/bar.bin", 1024);
        assert_ne!(a, b);
    }

    #[test]
    fn addr_cache_misses_without_rendezvous_file() {
        let _g = crate::test_support::CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let cache = AddrCache::new("nonexistent-job".into());
        assert!(cache.resolve(0).is_err());

        std::env::set_current_dir(saved).unwrap();
    }

    #[test]
    fn addr_cache_resolves_and_caches() {
        let _g = crate::test_support::CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        hvac_config::rendezvous::append_line("job-1", 3, "127.0.0.1:6000").unwrap();
        let cache = AddrCache::new("job-1".into());
        assert_eq!(cache.resolve(3).unwrap(), "127.0.0.1:6000");
        // Second resolve should hit the cache even if we remove the file.
        std::fs::remove_file("./.ports.cfg.job-1").unwrap();
        assert_eq!(cache.resolve(3).unwrap(), "127.0.0.1:6000");

        std::env::set_current_dir(saved).unwrap();
    }
}
