//! Client-side operation engine: decides whether a path is tracked, drives
//! the open/read/pread/seek/close RPCs, and exposes the small surface
//! `hvac-shim` calls into from its libc hooks.

use std::time::Duration;

use hvac_config::path::OpenFlags;
use hvac_config::Config;
use hvac_wire::{CloseIn, OpenIn, OpenOut, ReadIn, ReadOut, Request, Response, SeekIn, SeekOut, StatsIn, StatsOut};

use crate::error::{HvacError, Result};
use crate::fd_table::FdTable;
use crate::session::Session;
use crate::stats::Stats;

/// Deadline `hvac_wait_fd_ready` enforces before a read/pread/seek may
/// proceed against a still-opening fd.
const FD_READY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HvacClient {
    config: Config,
    fd_table: FdTable,
    session: Session,
    stats: Stats,
}

impl HvacClient {
    pub fn new(config: Config) -> Self {
        let session = Session::new(config.job_id.clone(), config.server_count);
        Self {
            config,
            fd_table: FdTable::new(),
            session,
            stats: Stats::new(),
        }
    }

    /// Decides whether `path` should be redirected through HVAC and, if so,
    /// dispatches the remote open and blocks for its result. Returns
    /// `false` (and leaves `fd` untracked) on any failure along the way,
    /// matching `hvac_track_file`'s "fall back to the real filesystem" rule.
    pub fn track_file(&self, path: &std::path::Path, flags: &OpenFlags, fd: i32) -> bool {
        if !hvac_config::path::is_tracked(path, flags, self.config.data_dir.as_deref()) {
            return false;
        }
        let canonical = match hvac_config::path::canonicalize(path) {
            Ok(p) => p,
            Err(_) => return false,
        };
        let canonical_str = canonical.to_string_lossy().into_owned();

        let entry = self.fd_table.insert_opening(fd, canonical_str.clone());
        let rank = self.session.rank_for_path(&canonical_str);

        let conn = match self.session.connection(rank) {
            Ok(c) => c,
            Err(_) => {
                entry.set_error();
                self.fd_table.remove(fd);
                return false;
            }
        };

        let resp = conn.call(Request::Open(OpenIn {
            path: canonical_str,
        }));

        match resp {
            Ok(Response::Open(OpenOut { ret_status })) if ret_status > 0 => {
                tracing::debug!(fd, remote_fd = ret_status, "open ready");
                entry.set_ready(ret_status);
                self.stats.record_open();
                true
            }
            _ => {
                tracing::debug!(fd, path = %entry.path, "remote open failed");
                entry.set_error();
                self.fd_table.remove(fd);
                false
            }
        }
    }

    pub fn file_tracked(&self, fd: i32) -> bool {
        self.fd_table.get(fd).is_some()
    }

    pub fn get_path(&self, fd: i32) -> Option<String> {
        self.fd_table.get(fd).map(|e| e.path.clone())
    }

    /// Sequential read: server advances its own file position.
    pub fn remote_read(&self, fd: i32, buf: &mut [u8]) -> i32 {
        self.do_read(fd, buf, -1, false)
    }

    /// Positioned read: server reads at `offset` without moving its
    /// position, matching the original's `offset != -1` disambiguation.
    pub fn remote_pread(&self, fd: i32, buf: &mut [u8], offset: i64) -> i32 {
        self.do_read(fd, buf, offset, true)
    }

    fn do_read(&self, fd: i32, buf: &mut [u8], offset: i64, is_pread: bool) -> i32 {
        let entry = match self.fd_table.get(fd) {
            Some(e) => e,
            None => {
                tracing::trace!(fd, "read on untracked fd");
                return -1;
            }
        };
        if !entry.wait_ready(FD_READY_TIMEOUT) {
            tracing::warn!(fd, path = %entry.path, "fd not ready before read deadline");
            return -1;
        }
        let remote_fd = entry.remote_fd();
        if remote_fd == 0 {
            tracing::warn!(fd, path = %entry.path, "ready fd has no remote_fd");
            return -1;
        }

        let rank = self.session.rank_for_path(&entry.path);
        let conn = match self.session.connection(rank) {
            Ok(c) => c,
            Err(_) => return -1,
        };

        let req = Request::Read(ReadIn {
            input_val: buf.len() as i32,
            bulk_handle: 0,
            accessfd: remote_fd,
            offset,
        });

        tracing::trace!(fd, rank, pread = is_pread, "dispatching read rpc");
        match conn.call_with_bulk_target(req, buf) {
            Ok(Response::Read(ReadOut { ret })) => {
                if ret > 0 {
                    if is_pread {
                        self.stats.record_pread(ret as u64);
                    } else {
                        self.stats.record_read(ret as u64);
                    }
                }
                ret
            }
            _ => -1,
        }
    }

    pub fn remote_lseek(&self, fd: i32, offset: i32, whence: i32) -> i32 {
        let entry = match self.fd_table.get(fd) {
            Some(e) => e,
            None => return -1,
        };
        if !entry.wait_ready(FD_READY_TIMEOUT) {
            return -1;
        }
        let rank = self.session.rank_for_path(&entry.path);
        let conn = match self.session.connection(rank) {
            Ok(c) => c,
            Err(_) => return -1,
        };

        let req = Request::Seek(SeekIn {
            fd: entry.remote_fd(),
            offset,
            whence,
        });
        tracing::trace!(fd, rank, "dispatching seek rpc");
        match conn.call(req) {
            Ok(Response::Seek(SeekOut { ret })) => {
                self.stats.record_seek();
                ret
            }
            _ => -1,
        }
    }

    pub fn remote_close(&self, fd: i32) {
        if let Some(entry) = self.fd_table.get(fd) {
            let rank = self.session.rank_for_path(&entry.path);
            if let Ok(conn) = self.session.connection(rank) {
                tracing::trace!(fd, rank, "dispatching close rpc");
                let _ = conn.send_no_reply(Request::Close(CloseIn {
                    fd: entry.remote_fd(),
                }));
            }
            self.stats.record_close();
        }
    }

    /// `remote_close` plus dropping the fd from the table; this is the
    /// combined operation the shim's `close()` hook calls.
    pub fn remove_fd(&self, fd: i32) -> bool {
        self.remote_close(fd);
        self.fd_table.remove(fd).is_some()
    }

    /// Triggers the server-side stats RPC against `rank`.
    pub fn request_stats(&self, rank: u32) -> Result<StatsOut> {
        let conn = self.session.connection(rank)?;
        match conn.call(Request::Stats(StatsIn { dummy: 0 }))? {
            Response::Stats(out) => Ok(out),
            _ => Err(HvacError::Remote(-1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mover::{MoverQueue, RedirectMap};
    use crate::server::HvacServer;
    use std::sync::Arc;

    fn start_server() -> String {
        let server = Arc::new(HvacServer::bind("127.0.0.1:0", RedirectMap::new(), MoverQueue::inert()).unwrap());
        let addr = server.local_addr().unwrap().to_string();
        std::thread::spawn(move || {
            let _ = server.serve();
        });
        addr
    }

    fn rendezvous_env(job_id: &str, addr: &str) {
        hvac_config::rendezvous::append_line(job_id, 0, addr).unwrap();
    }

    fn rdonly() -> OpenFlags {
        OpenFlags {
            write_only: false,
            append: false,
        }
    }

    #[test]
    fn track_file_rejects_untracked_path() {
        let _g = crate::test_support::CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let config = Config {
            server_count: 1,
            data_dir: Some(dir.path().to_path_buf()),
            job_id: "client-test-untracked".into(),
            proc_id: None,
        };
        let client = HvacClient::new(config);
        let missing = dir.path().join("missing.txt");
        assert!(!client.track_file(&missing, &rdonly(), 10));
        assert!(!client.file_tracked(10));

        std::env::set_current_dir(saved).unwrap();
    }

    #[test]
    fn track_open_read_seek_close_end_to_end() {
        let _g = crate::test_support::CWD_LOCK.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let saved = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir.path()).unwrap();

        let file_path = dir.path().join("data.bin");
        std::fs::write(&file_path, b"abcdefghij").unwrap();

        let addr = start_server();
        let job_id = "client-test-e2e";
        rendezvous_env(job_id, &addr);

        let config = Config {
            server_count: 1,
            data_dir: Some(dir.path().to_path_buf()),
            job_id: job_id.into(),
            proc_id: None,
        };
        let client = HvacClient::new(config);

        assert!(client.track_file(&file_path, &rdonly(), 11));
        assert!(client.file_tracked(11));
        assert_eq!(
            client.get_path(11).unwrap(),
            file_path.canonicalize().unwrap().to_string_lossy().into_owned()
        );

        let mut buf = vec![0u8; 4];
        assert_eq!(client.remote_read(11, &mut buf), 4);
        assert_eq!(&buf, b"abcd");

        let mut pbuf = vec![0u8; 3];
        assert_eq!(client.remote_pread(11, &mut pbuf, 4), 3);
        assert_eq!(&pbuf, b"efg");

        assert_eq!(client.remote_lseek(11, 0, 0), 0);

        assert!(client.remove_fd(11));
        assert!(!client.file_tracked(11));

        std::env::set_current_dir(saved).unwrap();
    }

    #[test]
    fn read_on_unknown_fd_returns_negative_one() {
        let config = Config {
            server_count: 1,
            data_dir: None,
            job_id: "client-test-unknown".into(),
            proc_id: None,
        };
        let client = HvacClient::new(config);
        let mut buf = vec![0u8; 4];
        assert_eq!(client.remote_read(99, &mut buf), -1);
        assert_eq!(client.remote_lseek(99, 0, 0), -1);
    }
}
