//! Server-side RPC handlers: accepts connections, serves open/read/pread/
//! seek/close/stats against locally opened files, honoring the redirect map
//! a data mover (out of scope here) may have populated.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::net::{TcpListener, TcpStream};
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use hvac_wire::{frame, CloseIn, OpenIn, OpenOut, ReadIn, ReadOut, Request, Response, SeekIn, SeekOut};

use crate::mover::{MoverQueue, RedirectMap};
use crate::stats::Stats;

pub struct HvacServer {
    listener: TcpListener,
    redirect_map: Arc<RedirectMap>,
    local_files: Mutex<HashMap<i32, File>>,
    fd_paths: Mutex<HashMap<i32, String>>,
    next_fd: AtomicI32,
    stats: Arc<Stats>,
    mover_queue: MoverQueue,
}

impl HvacServer {
    pub fn bind(addr: &str, redirect_map: Arc<RedirectMap>, mover_queue: MoverQueue) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        Ok(Self {
            listener,
            redirect_map,
            local_files: Mutex::new(HashMap::new()),
            fd_paths: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(1),
            stats: Arc::new(Stats::new()),
            mover_queue,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Accepts connections forever, spawning one handler thread each. The
    /// binary crate is responsible for stopping the process on SIGINT/
    /// SIGTERM; this loop has no separate shutdown switch.
    pub fn serve(self: Arc<Self>) -> std::io::Result<()> {
        loop {
            let (stream, peer) = self.listener.accept()?;
            tracing::info!(%peer, "accepted connection");
            let server = self.clone();
            std::thread::spawn(move || {
                if let Err(e) = server.handle_connection(stream) {
                    tracing::debug!(error = %e, "connection closed");
                }
            });
        }
    }

    fn handle_connection(&self, stream: TcpStream) -> hvac_wire::Result<()> {
        stream.set_nodelay(true).ok();
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        loop {
            let frame = frame::recv_frame(&mut reader)?;
            let frame::Frame::Request { seq, body } = frame else {
                continue;
            };
            match body {
                Request::Open(in_) => self.handle_open(&mut writer, seq, in_)?,
                Request::Read(in_) => self.handle_read(&mut writer, seq, in_)?,
                Request::Seek(in_) => self.handle_seek(&mut writer, seq, in_)?,
                Request::Close(in_) => self.handle_close(in_),
                Request::Stats(_) => {
                    frame::send_response(&mut writer, seq, &Response::Stats(self.stats.print_and_status()))?;
                }
            }
        }
    }

    fn handle_open(
        &self,
        writer: &mut BufWriter<TcpStream>,
        seq: u64,
        in_: OpenIn,
    ) -> hvac_wire::Result<()> {
        let actual = self.redirect_map.resolve(&in_.path);
        let ret_status = match File::open(&actual) {
            Ok(file) => {
                let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
                self.local_files.lock().unwrap().insert(fd, file);
                self.fd_paths.lock().unwrap().insert(fd, in_.path.clone());
                self.stats.record_open();
                fd
            }
            Err(e) => {
                tracing::warn!(path = %in_.path, error = %e, "remote open failed");
                -1
            }
        };
        frame::send_response(writer, seq, &Response::Open(OpenOut { ret_status }))
    }

    fn handle_read(
        &self,
        writer: &mut BufWriter<TcpStream>,
        seq: u64,
        in_: ReadIn,
    ) -> hvac_wire::Result<()> {
        let len = in_.input_val.max(0) as usize;
        let mut buf = vec![0u8; len];

        let n = {
            let mut files = self.local_files.lock().unwrap();
            match files.get_mut(&in_.accessfd) {
                Some(file) => {
                    if in_.offset >= 0 {
                        file.read_at(&mut buf, in_.offset as u64).ok()
                    } else {
                        file.read(&mut buf).ok()
                    }
                }
                None => None,
            }
        };

        match n {
            Some(n) => {
                if in_.offset >= 0 {
                    self.stats.record_pread(n as u64);
                } else {
                    self.stats.record_read(n as u64);
                }
                frame::send_bulk_push(writer, seq, &buf[..n])?;
                frame::send_response(writer, seq, &Response::Read(ReadOut { ret: n as i32 }))
            }
            None => frame::send_response(writer, seq, &Response::Read(ReadOut { ret: -1 })),
        }
    }

    fn handle_seek(
        &self,
        writer: &mut BufWriter<TcpStream>,
        seq: u64,
        in_: SeekIn,
    ) -> hvac_wire::Result<()> {
        let pos = seek_from(in_.offset, in_.whence);
        let ret = match pos {
            Some(pos) => {
                let mut files = self.local_files.lock().unwrap();
                match files.get_mut(&in_.fd) {
                    Some(file) => file.seek(pos).map(|p| p as i32).unwrap_or(-1),
                    None => -1,
                }
            }
            None => -1,
        };
        if ret >= 0 {
            self.stats.record_seek();
        }
        frame::send_response(writer, seq, &Response::Seek(SeekOut { ret }))
    }

    fn handle_close(&self, in_: CloseIn) {
        self.local_files.lock().unwrap().remove(&in_.fd);
        if let Some(path) = self.fd_paths.lock().unwrap().remove(&in_.fd) {
            if !self.redirect_map.contains(&path) {
                self.mover_queue.enqueue(&path);
            }
        }
        self.stats.record_close();
    }
}

fn seek_from(offset: i32, whence: i32) -> Option<SeekFrom> {
    match whence {
        0 if offset >= 0 => Some(SeekFrom::Start(offset as u64)),
        1 => Some(SeekFrom::Current(offset as i64)),
        2 => Some(SeekFrom::End(offset as i64)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn open_read_seek_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("data.bin");
        std::fs::write(&file_path, b"0123456789").unwrap();

        let server = Arc::new(HvacServer::bind("127.0.0.1:0", RedirectMap::new(), MoverQueue::inert()).unwrap());
        let addr = server.local_addr().unwrap().to_string();
        let srv = server.clone();
        std::thread::spawn(move || {
            let _ = srv.serve();
        });

        let mut stream = std::net::TcpStream::connect(&addr).unwrap();
        let mut writer = stream.try_clone().unwrap();

        frame::send_request(
            &mut writer,
            1,
            &Request::Open(OpenIn {
                path: file_path.to_string_lossy().into_owned(),
            }),
        )
        .unwrap();
        writer.flush().unwrap();

        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let remote_fd = match frame::recv_frame(&mut reader).unwrap() {
            frame::Frame::Response {
                body: Response::Open(OpenOut { ret_status }),
                ..
            } => {
                assert!(ret_status >= 0);
                ret_status
            }
            other => panic!("unexpected: {other:?}"),
        };

        frame::send_request(
            &mut writer,
            2,
            &Request::Read(ReadIn {
                input_val: 5,
                bulk_handle: 0,
                accessfd: remote_fd,
                offset: -1,
            }),
        )
        .unwrap();
        writer.flush().unwrap();

        let bulk = match frame::recv_frame(&mut reader).unwrap() {
            frame::Frame::BulkPush { bytes, .. } => bytes,
            other => panic!("unexpected: {other:?}"),
        };
        assert_eq!(bulk, b"01234");
        match frame::recv_frame(&mut reader).unwrap() {
            frame::Frame::Response {
                body: Response::Read(ReadOut { ret }),
                ..
            } => assert_eq!(ret, 5),
            other => panic!("unexpected: {other:?}"),
        }

        frame::send_request(
            &mut writer,
            3,
            &Request::Close(CloseIn { fd: remote_fd }),
        )
        .unwrap();
        writer.flush().unwrap();
    }

    #[test]
    fn close_enqueues_unredirected_path_on_mover_queue() {
        use crate::mover::redirect_hook;
        use std::sync::mpsc;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("stage.bin");
        std::fs::write(&file_path, b"hi").unwrap();

        let redirect_map = RedirectMap::new();
        let (staged_tx, staged_rx) = mpsc::channel();
        let hook = redirect_hook(redirect_map.clone());
        let (mover_queue, _drain_thread) = MoverQueue::spawn(hook, move |requested| {
            staged_tx.send(requested.to_string()).unwrap();
            None
        });

        let server = Arc::new(HvacServer::bind("127.0.0.1:0", redirect_map, mover_queue).unwrap());
        let addr = server.local_addr().unwrap().to_string();
        let srv = server.clone();
        std::thread::spawn(move || {
            let _ = srv.serve();
        });

        let mut stream = std::net::TcpStream::connect(&addr).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());

        frame::send_request(
            &mut writer,
            1,
            &Request::Open(OpenIn {
                path: file_path.to_string_lossy().into_owned(),
            }),
        )
        .unwrap();
        writer.flush().unwrap();

        let remote_fd = match frame::recv_frame(&mut reader).unwrap() {
            frame::Frame::Response {
                body: Response::Open(OpenOut { ret_status }),
                ..
            } => ret_status,
            other => panic!("unexpected: {other:?}"),
        };

        frame::send_request(&mut writer, 2, &Request::Close(CloseIn { fd: remote_fd })).unwrap();
        writer.flush().unwrap();

        let staged = staged_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(staged, file_path.to_string_lossy().into_owned());
    }
}
