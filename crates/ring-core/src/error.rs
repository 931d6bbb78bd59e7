//! Ring core error taxonomy.
//!
//! Matches the error taxonomy exactly: invalid argument, resource
//! exhaustion, would-block, bad file, interrupted, and overflow. Every
//! negative CQE `res` is produced by converting one of these to its
//! negative-errno-style representation.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    /// Malformed setup parameters, unsupported opcode, non-zero reserved
    /// flags, out-of-range depth, or a mode conflict (e.g. polled mode
    /// requested against a file with no direct-I/O support).
    InvalidArgument,
    /// Request allocation failure, ring memory accounting failure, or
    /// worker enqueue failure. Always "try again later"; the SQE that
    /// triggered it is treated as not consumed.
    ResourceExhausted,
    /// Expected on the fast path. Triggers deferral to the offload
    /// worker and is never surfaced to the caller on its own.
    WouldBlock,
    /// fd lookup failure, or the file does not support the requested
    /// method. Fatal to the Request; published as a negative CQE.
    BadFile,
    /// A syscall-restart sentinel was observed; the SQE may already have
    /// been mutated by the application, so re-entry is never attempted.
    Interrupted,
    /// CQ had no space for a completion. The Request is still freed and
    /// its result is lost; this is a known-lossy condition reported only
    /// through the shared `overflow` counter.
    Overflow,
    /// Raw OS error passthrough (errno).
    Os(i32),
}

impl RingError {
    /// Negative-errno-style value suitable for a CQE's `res` field.
    pub fn as_negative_errno(self) -> i32 {
        match self {
            Self::InvalidArgument => -(libc_errno::EINVAL),
            Self::ResourceExhausted => -(libc_errno::EAGAIN),
            Self::WouldBlock => -(libc_errno::EAGAIN),
            Self::BadFile => -(libc_errno::EBADF),
            Self::Interrupted => -(libc_errno::EINTR),
            Self::Overflow => -(libc_errno::ENOSPC),
            Self::Os(e) => -e,
        }
    }
}

/// A handful of errno values, duplicated here so this crate stays
/// dependency-free (the concrete backend crate pulls in `libc` for the
/// real thing).
mod libc_errno {
    pub const EINVAL: i32 = 22;
    pub const EAGAIN: i32 = 11;
    pub const EBADF: i32 = 9;
    pub const EINTR: i32 = 4;
    pub const ENOSPC: i32 = 28;
}

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::ResourceExhausted => write!(f, "resource exhausted, try again"),
            Self::WouldBlock => write!(f, "would block"),
            Self::BadFile => write!(f, "bad file descriptor"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Overflow => write!(f, "completion queue overflow"),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for RingError {}

pub type Result<T> = std::result::Result<T, RingError>;
