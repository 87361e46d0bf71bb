//! Blocking TCP transport session per server rank: one writer, shared under
//! a mutex for serialized frame dispatch, and one background reader thread
//! that demultiplexes response/bulk-push frames by sequence id to the
//! matching `Waiter`. The one-sided bulk-transfer primitive is realized as a
//! `BulkPush` frame written directly into the caller's registered buffer by
//! the reader thread, sent ahead of the RPC response it completes.

use std::collections::HashMap;
use std::io::{BufReader, BufWriter, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use hvac_wire::{frame, Request, Response};

use crate::error::{HvacError, Result};
use crate::waiter::Waiter;

/// What a pending RPC resolves to: the response body, or a note that the
/// connection died before one arrived.
type OpOutcome = std::result::Result<Response, String>;

/// A caller-registered one-sided bulk target: the buffer a `BulkPush` frame
/// writes into before the matching RPC response is delivered. `buf` points
/// into memory the caller guarantees stays valid until the response
/// arrives (mirrors `HG_Bulk_create`'s registration contract).
struct BulkTarget {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: the pointer is only ever dereferenced by the single reader thread
// that owns this connection, and only while the registering call is still
// blocked waiting on the paired `Waiter` — the caller cannot free or move
// the buffer until that wait returns.
unsafe impl Send for BulkTarget {}

struct PendingOp {
    waiter: Arc<Waiter<OpOutcome>>,
    bulk: Option<BulkTarget>,
}

struct Shared {
    writer: Mutex<BufWriter<TcpStream>>,
    pending: Mutex<HashMap<u64, PendingOp>>,
    next_seq: AtomicU64,
}

/// One persistent connection to a single server rank.
pub struct Connection {
    shared: Arc<Shared>,
    _reader_thread: JoinHandle<()>,
}

impl Connection {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let reader_stream = stream.try_clone()?;

        let shared = Arc::new(Shared {
            writer: Mutex::new(BufWriter::new(stream)),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        });

        let reader_shared = shared.clone();
        let reader_thread = std::thread::spawn(move || {
            Self::progress_loop(reader_shared, reader_stream);
        });

        Ok(Self {
            shared,
            _reader_thread: reader_thread,
        })
    }

    fn progress_loop(shared: Arc<Shared>, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        loop {
            let frame = match frame::recv_frame(&mut reader) {
                Ok(f) => f,
                Err(e) => {
                    // Connection closed or errored; fail every outstanding
                    // waiter so callers don't block forever.
                    let mut pending = shared.pending.lock().unwrap();
                    for (_, op) in pending.drain() {
                        op.waiter.signal(Err(e.to_string()));
                    }
                    return;
                }
            };
            match frame {
                frame::Frame::BulkPush { seq, bytes } => {
                    let mut pending = shared.pending.lock().unwrap();
                    if let Some(op) = pending.get_mut(&seq) {
                        if let Some(target) = &op.bulk {
                            let n = bytes.len().min(target.len);
                            // SAFETY: see `BulkTarget`'s Send justification.
                            unsafe {
                                std::ptr::copy_nonoverlapping(bytes.as_ptr(), target.ptr, n);
                            }
                        }
                    }
                }
                frame::Frame::Response { seq, body } => {
                    let op = shared.pending.lock().unwrap().remove(&seq);
                    if let Some(op) = op {
                        op.waiter.signal(Ok(body));
                    }
                }
                frame::Frame::Request { .. } => {
                    // Clients never receive request frames on this stream.
                }
            }
        }
    }

    fn next_seq(&self) -> u64 {
        self.shared.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `req`, blocks for the matching response with no deadline.
    pub fn call(&self, req: Request) -> Result<Response> {
        let (_seq, waiter) = self.dispatch(req, None)?;
        waiter.wait().map_err(HvacError::Bootstrap)
    }

    /// Sends a read/pread request with a bulk target registered so the
    /// progress thread writes the payload directly into `buf` before
    /// signaling completion.
    pub fn call_with_bulk_target(&self, req: Request, buf: &mut [u8]) -> Result<Response> {
        let target = BulkTarget {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        };
        let (_seq, waiter) = self.dispatch(req, Some(target))?;
        waiter.wait().map_err(HvacError::Bootstrap)
    }

    /// Fire-and-forget dispatch for RPCs with no response (`close`).
    pub fn send_no_reply(&self, req: Request) -> Result<()> {
        let seq = self.next_seq();
        let mut writer = self.shared.writer.lock().unwrap();
        frame::send_request(&mut *writer, seq, &req)?;
        writer.flush()?;
        Ok(())
    }

    fn dispatch(
        &self,
        req: Request,
        bulk: Option<BulkTarget>,
    ) -> Result<(u64, Arc<Waiter<OpOutcome>>)> {
        let seq = self.next_seq();
        let waiter = Arc::new(Waiter::new());
        self.shared.pending.lock().unwrap().insert(
            seq,
            PendingOp {
                waiter: waiter.clone(),
                bulk,
            },
        );

        let mut writer = self.shared.writer.lock().unwrap();
        if let Err(e) = frame::send_request(&mut *writer, seq, &req) {
            drop(writer);
            self.shared.pending.lock().unwrap().remove(&seq);
            return Err(e.into());
        }
        if let Err(e) = writer.flush() {
            drop(writer);
            self.shared.pending.lock().unwrap().remove(&seq);
            return Err(e.into());
        }
        drop(writer);

        Ok((seq, waiter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hvac_wire::{OpenIn, OpenOut, ReadIn, ReadOut};
    use std::net::TcpListener;

    /// Minimal in-process stand-in for `server::handle_connection`, just
    /// enough to exercise the client side's framing and bulk-target wiring.
    fn spawn_echo_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = BufWriter::new(stream);
            loop {
                let frame = match frame::recv_frame(&mut reader) {
                    Ok(f) => f,
                    Err(_) => return,
                };
                match frame {
                    frame::Frame::Request {
                        seq,
                        body: Request::Open(OpenIn { .. }),
                    } => {
                        frame::send_response(
                            &mut writer,
                            seq,
                            &Response::Open(OpenOut { ret_status: 0 }),
                        )
                        .unwrap();
                    }
                    frame::Frame::Request {
                        seq,
                        body: Request::Read(ReadIn { input_val, .. }),
                    } => {
                        let payload = vec![b'x'; input_val as usize];
                        frame::send_bulk_push(&mut writer, seq, &payload).unwrap();
                        frame::send_response(
                            &mut writer,
                            seq,
                            &Response::Read(ReadOut {
                                ret: payload.len() as i32,
                            }),
                        )
                        .unwrap();
                    }
                    _ => return,
                }
            }
        });
        (addr, handle)
    }

    #[test]
    fn call_round_trips_open() {
        let (addr, _srv) = spawn_echo_server();
        let conn = Connection::connect(&addr).unwrap();
        let resp = conn
            .call(Request::Open(OpenIn {
                path: "/data/f".into(),
            }))
            .unwrap();
        match resp {
            Response::Open(OpenOut { ret_status }) => assert_eq!(ret_status, 0),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bulk_target_receives_pushed_bytes() {
        let (addr, _srv) = spawn_echo_server();
        let conn = Connection::connect(&addr).unwrap();
        let mut buf = vec![0u8; 8];
        let resp = conn
            .call_with_bulk_target(
                Request::Read(ReadIn {
                    input_val: 8,
                    bulk_handle: 0,
                    accessfd: 1,
                    offset: -1,
                }),
                &mut buf,
            )
            .unwrap();
        match resp {
            Response::Read(ReadOut { ret }) => assert_eq!(ret, 8),
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(buf, vec![b'x'; 8]);
    }
}
