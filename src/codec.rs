//! Frame codec: the 8-byte header + obfuscated-payload wire format.
//!
//! A frame on the wire is:
//!
//! ```text
//! +--------+--------+----------+------------------------+
//! | length | opcode | checksum | payload (obfuscated)    |
//! | 4B BE  | 2B BE  | 2B BE    | `length` bytes           |
//! +--------+--------+----------+------------------------+
//! ```
//!
//! The checksum is the sum of the *raw* (pre-XOR) payload bytes mod 2^16.
//! Payload bytes on the wire are XOR'd with [`XOR_KEY`]; this is obfuscation,
//! not a security primitive.

use std::io::{self, ErrorKind, Read, Write};

use crate::error::FrameError;

pub const HEADER_LEN: usize = 8;
pub const XOR_KEY: u8 = 0x5A;
/// Default cap on a single frame's payload length (256 KiB).
pub const MAX_PAYLOAD_LEN: u32 = 256 * 1024;

/// Wire opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LoginReq,
    LoginResp,
    Move,
    Update,
    Error,
    Logout,
    Die,
    Heartbeat,
    HeartbeatAck,
    /// Any value outside the table above; treated as a benign no-op that
    /// still refreshes the connection's activity timestamp.
    Unknown(u16),
}

impl From<u16> for Opcode {
    fn from(raw: u16) -> Self {
        match raw {
            1 => Opcode::LoginReq,
            2 => Opcode::LoginResp,
            3 => Opcode::Move,
            4 => Opcode::Update,
            5 => Opcode::Error,
            6 => Opcode::Logout,
            7 => Opcode::Die,
            8 => Opcode::Heartbeat,
            9 => Opcode::HeartbeatAck,
            other => Opcode::Unknown(other),
        }
    }
}

impl From<Opcode> for u16 {
    fn from(op: Opcode) -> Self {
        match op {
            Opcode::LoginReq => 1,
            Opcode::LoginResp => 2,
            Opcode::Move => 3,
            Opcode::Update => 4,
            Opcode::Error => 5,
            Opcode::Logout => 6,
            Opcode::Die => 7,
            Opcode::Heartbeat => 8,
            Opcode::HeartbeatAck => 9,
            Opcode::Unknown(raw) => raw,
        }
    }
}

/// Sums raw payload bytes mod 2^16.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for &b in data {
        sum = sum.wrapping_add(b as u32);
    }
    (sum & 0xFFFF) as u16
}

/// XORs every byte with [`XOR_KEY`] in place; self-inverse.
pub fn xor_cipher(data: &mut [u8]) {
    for b in data.iter_mut() {
        *b ^= XOR_KEY;
    }
}

/// Builds the full on-wire byte sequence (header + obfuscated payload) for
/// one message. `raw_payload` is the pre-obfuscation body.
pub fn encode(opcode: u16, raw_payload: &[u8]) -> Vec<u8> {
    let cksum = if raw_payload.is_empty() {
        0
    } else {
        checksum(raw_payload)
    };

    let mut out = Vec::with_capacity(HEADER_LEN + raw_payload.len());
    out.extend_from_slice(&(raw_payload.len() as u32).to_be_bytes());
    out.extend_from_slice(&opcode.to_be_bytes());
    out.extend_from_slice(&cksum.to_be_bytes());

    let mut obfuscated = raw_payload.to_vec();
    xor_cipher(&mut obfuscated);
    out.extend_from_slice(&obfuscated);
    out
}

/// Writes one frame to `writer`, retrying on `WouldBlock` until the whole
/// frame is flushed. Mirrors the original's `send_packet` loop that keeps
/// calling `send()` until `total_sent == payload_len`.
pub fn send_frame<W: Write>(writer: &mut W, opcode: u16, raw_payload: &[u8]) -> io::Result<()> {
    let bytes = encode(opcode, raw_payload);
    let mut sent = 0;
    while sent < bytes.len() {
        match writer.write(&bytes[sent..]) {
            Ok(0) => return Err(io::Error::new(ErrorKind::WriteZero, "peer closed connection")),
            Ok(n) => sent += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads exactly one framed message from a blocking-style reader: used by
/// tests and by the in-process scenario-test client. Reads the header
/// all-or-nothing, then loops reading the body until `length` bytes are
/// consumed or the peer closes.
pub fn decode_from<R: Read>(reader: &mut R) -> Result<(u16, Vec<u8>), FrameError> {
    let mut header = [0u8; HEADER_LEN];
    read_exact_mapped(reader, &mut header)?;

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let opcode = u16::from_be_bytes([header[4], header[5]]);
    let expected_checksum = u16::from_be_bytes([header[6], header[7]]);

    if len > MAX_PAYLOAD_LEN {
        return Err(FrameError::MalformedFrame {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    if len == 0 {
        return Ok((opcode, Vec::new()));
    }

    let mut payload = vec![0u8; len as usize];
    read_exact_mapped(reader, &mut payload)?;

    xor_cipher(&mut payload);
    let actual = checksum(&payload);
    if actual != expected_checksum {
        return Err(FrameError::ChecksumMismatch {
            expected: expected_checksum,
            actual,
        });
    }

    Ok((opcode, payload))
}

fn read_exact_mapped<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(FrameError::ShortRead),
        Err(e) => Err(FrameError::Io(e)),
    }
}

/// Incremental frame decoder over a growable byte buffer, for non-blocking
/// sockets: bytes read off the wire are appended with [`FrameBuffer::feed`],
/// and [`FrameBuffer::try_decode`] pops one complete frame at a time.
#[derive(Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Tries to pop one complete frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` when fewer bytes are buffered than the next frame
    /// needs (caller should keep reading). Returns `Err` on a malformed
    /// length or checksum mismatch, both fatal regardless of how many more
    /// bytes might arrive, so the caller should drop the connection.
    pub fn try_decode(&mut self) -> Result<Option<(u16, Vec<u8>)>, FrameError> {
        if self.buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::MalformedFrame {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }

        let total = HEADER_LEN + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        let opcode = u16::from_be_bytes([self.buf[4], self.buf[5]]);
        let expected_checksum = u16::from_be_bytes([self.buf[6], self.buf[7]]);

        let mut payload: Vec<u8> = self.buf[HEADER_LEN..total].to_vec();
        xor_cipher(&mut payload);
        let actual = checksum(&payload);

        self.buf.drain(0..total);

        if actual != expected_checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: expected_checksum,
                actual,
            });
        }

        Ok(Some((opcode, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_empty_payload() {
        let bytes = encode(1, &[]);
        let mut cursor = Cursor::new(bytes);
        let (opcode, payload) = decode_from(&mut cursor).unwrap();
        assert_eq!(opcode, 1);
        assert!(payload.is_empty());
    }

    #[test]
    fn round_trip_login_resp_slot_zero() {
        // Slot id 0's raw bytes are 00 00 00 00, XOR'd with 0x5A should
        // appear on the wire as 5A 5A 5A 5A.
        let raw_payload = 0u32.to_be_bytes();
        let bytes = encode(2, &raw_payload);
        assert_eq!(&bytes[HEADER_LEN..], &[0x5A, 0x5A, 0x5A, 0x5A]);

        let mut cursor = Cursor::new(bytes);
        let (opcode, payload) = decode_from(&mut cursor).unwrap();
        assert_eq!(opcode, 2);
        assert_eq!(payload, raw_payload);
    }

    #[test]
    fn flipping_a_payload_byte_trips_checksum() {
        let mut bytes = encode(3, b"hello");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut cursor = Cursor::new(bytes);
        let err = decode_from(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
    }

    #[test]
    fn oversized_length_is_malformed() {
        let mut header = Vec::new();
        header.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        header.extend_from_slice(&1u16.to_be_bytes());
        header.extend_from_slice(&0u16.to_be_bytes());
        let mut cursor = Cursor::new(header);
        let err = decode_from(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::MalformedFrame { .. }));
    }

    #[test]
    fn truncated_stream_is_short_read() {
        let bytes = encode(1, b"abc");
        let mut cursor = Cursor::new(bytes[..HEADER_LEN + 1].to_vec());
        let err = decode_from(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::ShortRead));
    }

    #[test]
    fn frame_buffer_accumulates_partial_reads() {
        let bytes = encode(8, b"ping");
        let mut fb = FrameBuffer::new();
        fb.feed(&bytes[..3]);
        assert!(fb.try_decode().unwrap().is_none());
        fb.feed(&bytes[3..]);
        let (opcode, payload) = fb.try_decode().unwrap().unwrap();
        assert_eq!(opcode, 8);
        assert_eq!(payload, b"ping");
        assert!(fb.is_empty());
    }

    #[test]
    fn frame_buffer_handles_back_to_back_frames() {
        let mut bytes = encode(8, b"a");
        bytes.extend_from_slice(&encode(8, b"b"));
        let mut fb = FrameBuffer::new();
        fb.feed(&bytes);
        let (_, p1) = fb.try_decode().unwrap().unwrap();
        let (_, p2) = fb.try_decode().unwrap().unwrap();
        assert_eq!(p1, b"a");
        assert_eq!(p2, b"b");
    }
}
