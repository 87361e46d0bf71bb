//! Wire contracts for the HVAC client/server protocol.
//!
//! Field names and record shapes follow the contract in the HVAC design: five
//! RPCs (open, read/pread, seek, close, stats), framed on a persistent stream
//! with a fixed header carrying a sequence id used to demultiplex completions
//! on the receiving side's progress thread.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

pub mod frame;

pub use frame::{recv_frame, send_bulk_push, send_request, send_response, Frame};

/// `open_in` / `open_out`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenIn {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenOut {
    pub ret_status: i32,
}

/// `read_in` / `read_out`. Covers both sequential reads and `pread` — the two
/// are disambiguated by `offset == -1` meaning "use the server's file
/// position" (spec §4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadIn {
    pub input_val: i32,
    /// Token identifying the client-registered bulk target this read's
    /// payload must be pushed into. Reused as the RPC's sequence id.
    pub bulk_handle: u64,
    pub accessfd: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadOut {
    pub ret: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeekIn {
    pub fd: i32,
    pub offset: i32,
    pub whence: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeekOut {
    pub ret: i32,
}

/// `close_in`. No response: close is fire-and-forget (spec §4.5, §4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CloseIn {
    pub fd: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StatsIn {
    pub dummy: i32,
}

/// Counters are printed server-side inside the RPC handler; the client only
/// gets a status code back.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatsOut {
    pub status: i32,
}

/// RPC request payloads a client may forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Open(OpenIn),
    Read(ReadIn),
    Seek(SeekIn),
    Close(CloseIn),
    Stats(StatsIn),
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Open(_) => "open",
            Request::Read(_) => "read",
            Request::Seek(_) => "seek",
            Request::Close(_) => "close",
            Request::Stats(_) => "stats",
        }
    }
}

/// RPC response payloads a server may return. `Close` has no variant here —
/// the close RPC never gets one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Open(OpenOut),
    Read(ReadOut),
    Seek(SeekOut),
    Stats(StatsOut),
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame magic")]
    BadMagic,
    #[error("unknown frame kind {0}")]
    UnknownFrameKind(u8),
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;

/// Blocking write of an arbitrary buffer.
pub(crate) fn write_all<W: Write>(w: &mut W, buf: &[u8]) -> io::Result<()> {
    w.write_all(buf)
}

pub(crate) fn read_exact<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<()> {
    r.read_exact(buf)
}
