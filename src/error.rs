//! Error types for the frame codec and the wire-facing parts of the server.
//!
//! Disposition for every variant here is always "drop the connection"; the
//! variants exist so the worker loop can log precisely without changing
//! behavior.

use thiserror::Error;

/// Errors that can occur while decoding a framed message off the wire.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload length {len} exceeds cap {max}")]
    MalformedFrame { len: u32, max: u32 },

    #[error("connection closed before a full frame was read")]
    ShortRead,

    #[error("checksum mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
