//! Ties the locator's address resolution to lazily-established per-rank
//! connections. One `Session` is shared by every tracked fd in a process;
//! connections are opened on first use and kept for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::locator::{self, AddrCache};
use crate::transport::Connection;

pub struct Session {
    server_count: u32,
    addr_cache: AddrCache,
    connections: Mutex<HashMap<u32, Arc<Connection>>>,
}

impl Session {
    pub fn new(job_id: String, server_count: u32) -> Self {
        Self {
            server_count,
            addr_cache: AddrCache::new(job_id),
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn rank_for_path(&self, path: &str) -> u32 {
        locator::shard_for_path(path, self.server_count)
    }

    /// Returns the shared connection for `rank`, opening it on first use.
    pub fn connection(&self, rank: u32) -> Result<Arc<Connection>> {
        if let Some(conn) = self.connections.lock().unwrap().get(&rank) {
            return Ok(conn.clone());
        }
        let addr = self.addr_cache.resolve(rank)?;
        let conn = Arc::new(Connection::connect(&addr)?);

        let mut connections = self.connections.lock().unwrap();
        // Another thread may have connected first; keep whichever won.
        Ok(connections.entry(rank).or_insert(conn).clone())
    }
}
