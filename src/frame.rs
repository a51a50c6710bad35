//! Wire-level framing: `[length: u64][tag: i32][payload: length bytes]`.
//!
//! The header is fixed at 12 bytes, little-endian. When `tag == BARRIER_TAG` the length
//! field MUST be zero and no payload follows — barrier frames are header-only, which is
//! the whole point of giving barrier its own reserved tag instead of sending `None`
//! through the general payload path.

use std::io::{Read, Write};

use crate::constants::BARRIER_TAG;
use crate::error::{Error, Result};

/// Size of the `(length, tag)` header in bytes.
pub const HEADER_SIZE: usize = 8 + 4;

/// Largest chunk read per `recv` syscall while draining a frame's payload.
const MAX_CHUNK: usize = 64 * 1024;

/// A single length-prefixed, tagged unit of payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The tag attached to this frame. Non-negative for user traffic, or one of the
    /// reserved negative constants in [`crate::constants`].
    pub tag: i32,
    /// The raw payload bytes. Always empty when `tag == BARRIER_TAG`.
    pub payload: Vec<u8>,
}

impl Frame {
    /// A zero-length barrier frame.
    pub fn barrier() -> Frame {
        Frame {
            tag: BARRIER_TAG,
            payload: Vec::new(),
        }
    }

    /// Write this frame to `stream`, retrying until the full header and payload are
    /// flushed. `Write::write_all` already gives us that retry semantics for the
    /// blocking sockets this crate uses, so this is a thin, explicit wrapper rather
    /// than a hand-rolled loop.
    pub fn send<W: Write>(stream: &mut W, tag: i32, payload: &[u8]) -> Result<()> {
        if tag == BARRIER_TAG {
            debug_assert!(payload.is_empty(), "barrier frames carry no payload");
            let mut header = [0u8; HEADER_SIZE];
            header[0..8].copy_from_slice(&0u64.to_le_bytes());
            header[8..12].copy_from_slice(&tag.to_le_bytes());
            stream.write_all(&header)?;
            return Ok(());
        }

        let len = payload.len() as u64;
        let mut header = [0u8; HEADER_SIZE];
        header[0..8].copy_from_slice(&len.to_le_bytes());
        header[8..12].copy_from_slice(&tag.to_le_bytes());
        stream.write_all(&header)?;
        stream.write_all(payload)?;
        Ok(())
    }

    /// Read one frame from `stream`.
    ///
    /// A zero-byte read before any header byte arrives means the peer closed the
    /// socket cleanly between frames: reported as [`Error::SocketClosed`]. A short
    /// read that returns zero bytes *mid*-frame (header or payload) is reported the
    /// same way, since both indicate the peer is gone.
    pub fn recv<R: Read>(stream: &mut R) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        recv_exact(stream, &mut header)?;

        let length = u64::from_le_bytes(header[0..8].try_into().unwrap());
        let tag = i32::from_le_bytes(header[8..12].try_into().unwrap());

        if tag == BARRIER_TAG {
            debug_assert_eq!(length, 0, "barrier frame with nonzero length on the wire");
            return Ok(Frame {
                tag,
                payload: Vec::new(),
            });
        }

        let mut payload = vec![0u8; length as usize];
        recv_exact(stream, &mut payload)?;
        Ok(Frame { tag, payload })
    }
}

/// Read exactly `buf.len()` bytes, in `MAX_CHUNK`-sized calls, treating a zero-byte
/// read as a closed socket.
fn recv_exact<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut read = 0;
    while read < buf.len() {
        let remaining = buf.len() - read;
        let chunk = remaining.min(MAX_CHUNK);
        let n = stream.read(&mut buf[read..read + chunk])?;
        if n == 0 {
            return Err(Error::SocketClosed { rank: None });
        }
        read += n;
    }
    Ok(())
}
