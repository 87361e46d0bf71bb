//! Frame header and codec.
//!
//! Wire format, 16-byte header followed by a `bincode`-encoded payload (raw
//! bytes for `BulkPush`):
//!
//! ```text
//! ┌──────────┬────────┬──────────┬───────────┬───────────┐
//! │Magic (2B)│Kind(1B)│Rsvd (1B) │Length (4B) │ SeqId (8B)│
//! │  "HV"    │        │          │  LE u32    │  LE u64   │
//! └──────────┴────────┴──────────┴───────────┴───────────┘
//! ```
//!
//! Modeled on the magic+type+length+seq_id framing used for HVAC's RPC
//! transport, with the sequence id doubling as the bulk-transfer token so a
//! `BulkPush` frame and the RPC response it precedes share one identifier.

use std::io::{Read, Write};

use crate::{read_exact, write_all, Request, Response, Result, WireError};

const MAGIC: [u8; 2] = *b"HV";
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Request = 0,
    Response = 1,
    BulkPush = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::Response),
            2 => Ok(FrameKind::BulkPush),
            other => Err(WireError::UnknownFrameKind(other)),
        }
    }
}

struct FrameHeader {
    kind: FrameKind,
    length: u32,
    seq: u64,
}

impl FrameHeader {
    const SIZE: usize = 16;

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&MAGIC);
        buf[2] = self.kind as u8;
        buf[3] = 0;
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8..16].copy_from_slice(&self.seq.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; Self::SIZE]) -> Result<Self> {
        if buf[0..2] != MAGIC {
            return Err(WireError::BadMagic);
        }
        Ok(Self {
            kind: FrameKind::try_from(buf[2])?,
            length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            seq: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
        })
    }
}

/// A decoded frame, as delivered to a connection's progress thread.
#[derive(Debug)]
pub enum Frame {
    Request { seq: u64, body: Request },
    Response { seq: u64, body: Response },
    BulkPush { seq: u64, bytes: Vec<u8> },
}

fn write_frame<W: Write>(w: &mut W, kind: FrameKind, seq: u64, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(WireError::PayloadTooLarge(payload.len()));
    }
    let header = FrameHeader {
        kind,
        length: payload.len() as u32,
        seq,
    };
    write_all(w, &header.to_bytes())?;
    write_all(w, payload)?;
    w.flush()?;
    Ok(())
}

pub fn send_request<W: Write>(w: &mut W, seq: u64, body: &Request) -> Result<()> {
    let payload = bincode::serialize(body)?;
    write_frame(w, FrameKind::Request, seq, &payload)
}

pub fn send_response<W: Write>(w: &mut W, seq: u64, body: &Response) -> Result<()> {
    let payload = bincode::serialize(body)?;
    write_frame(w, FrameKind::Response, seq, &payload)
}

/// Pushes a bulk payload for `seq`. Callers must send this *before* the
/// matching RPC response so a single-reader progress thread observes the
/// data write ahead of the completion signal (spec §4.6 step 5 vs step 6).
pub fn send_bulk_push<W: Write>(w: &mut W, seq: u64, bytes: &[u8]) -> Result<()> {
    write_frame(w, FrameKind::BulkPush, seq, bytes)
}

/// Blocking read of one frame. Returns `Err` on I/O failure or malformed
/// header; a cleanly closed stream surfaces as an `io::Error` with
/// `UnexpectedEof` from the underlying `read_exact`.
pub fn recv_frame<R: Read>(r: &mut R) -> Result<Frame> {
    let mut header_buf = [0u8; FrameHeader::SIZE];
    read_exact(r, &mut header_buf)?;
    let header = FrameHeader::from_bytes(&header_buf)?;

    let mut payload = vec![0u8; header.length as usize];
    read_exact(r, &mut payload)?;

    Ok(match header.kind {
        FrameKind::Request => Frame::Request {
            seq: header.seq,
            body: bincode::deserialize(&payload)?,
        },
        FrameKind::Response => Frame::Response {
            seq: header.seq,
            body: bincode::deserialize(&payload)?,
        },
        FrameKind::BulkPush => Frame::BulkPush {
            seq: header.seq,
            bytes: payload,
        },
    })
}
