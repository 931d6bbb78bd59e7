//! Fixed-layout submission/completion records and the ring header shared
//! between application and core.
//!
//! These are the lingua franca between every component in the workspace:
//! every field is `repr(C)` and laid out exactly as described, because
//! the core reads and writes them through memory shared with (and
//! partly untrusted from) the application.

use std::sync::atomic::AtomicU32;

/// Opcode accepted on the submission side. Anything else is rejected at
/// dispatch time with `RingError::InvalidArgument`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Readv = 1,
    Writev = 2,
    Fsync = 3,
}

impl Opcode {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Opcode::Nop),
            1 => Some(Opcode::Readv),
            2 => Some(Opcode::Writev),
            3 => Some(Opcode::Fsync),
            _ => None,
        }
    }
}

/// `op_flags` bits when `opcode == Fsync`.
pub mod fsync_flags {
    pub const DATASYNC: u32 = 1 << 0;
}

/// Submission Queue Entry — 64-byte fixed record written by the
/// application, read by the core.
///
/// Field order is chosen so no compiler padding is inserted between
/// fields; the trailing reserved bytes bring the struct to exactly 64.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy)]
pub struct Sqe {
    pub opcode: u8,
    /// Reserved; any non-zero value is rejected at dispatch.
    pub flags: u8,
    pub ioprio: u16,
    /// Opaque file handle index, application-supplied.
    pub fd: u32,
    /// File offset; for FSYNC, the start of the range.
    pub off: u64,
    /// User pointer to an iovec array (READV/WRITEV only).
    pub addr: u64,
    /// iovec count (READV/WRITEV) or range length (FSYNC).
    pub len: u32,
    /// `rw_flags` for READV/WRITEV, `fsync_flags` for FSYNC (union by convention).
    pub op_flags: u32,
    /// Opaque token echoed back in the completion.
    pub user_data: u64,
    _reserved: [u8; 24],
}

impl Sqe {
    pub const fn new(opcode: Opcode, fd: u32, off: u64, user_data: u64) -> Self {
        Self {
            opcode: opcode as u8,
            flags: 0,
            ioprio: 0,
            fd,
            off,
            addr: 0,
            len: 0,
            op_flags: 0,
            user_data,
            _reserved: [0; 24],
        }
    }

    pub const fn nop(user_data: u64) -> Self {
        Self::new(Opcode::Nop, 0, 0, user_data)
    }
}

const _SQE_IS_64_BYTES: () = assert!(std::mem::size_of::<Sqe>() == 64);

pub mod cqe_flags {
    pub const MORE: u32 = 1 << 0;
}

/// Completion Queue Entry — `user_data(8) | res(4) | flags(4)` bytes,
/// little-endian, as specified for the application-visible ring.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Cqe {
    pub user_data: u64,
    pub res: i32,
    pub flags: u32,
}

const _CQE_IS_16_BYTES: () = assert!(std::mem::size_of::<Cqe>() == 16);

/// Shared ring header: `head`, `tail`, and the application-visible
/// masking/sizing fields, plus one auxiliary monotonic counter whose
/// meaning differs by ring (`dropped` for SQ, `overflow` for CQ).
///
/// `head`/`tail` are plain 32-bit counters that wrap naturally; readers
/// apply `& ring_mask` to index. This type is purely the shared-memory
/// layout — ordering discipline on the atomics is the ring
/// implementation's responsibility (`ring-backend`), not this type's.
#[repr(C, align(64))]
pub struct RingHeader {
    pub head: AtomicU32,
    pub tail: AtomicU32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub aux_counter: AtomicU32,
    pub ring_flags: u32,
    _reserved: [u8; 40],
}

impl RingHeader {
    pub fn new(ring_entries: u32) -> Self {
        debug_assert!(ring_entries.is_power_of_two());
        Self {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            ring_mask: ring_entries - 1,
            ring_entries,
            aux_counter: AtomicU32::new(0),
            ring_flags: 0,
            _reserved: [0; 40],
        }
    }
}

const _RING_HEADER_IS_64_BYTES: () = assert!(std::mem::size_of::<RingHeader>() == 64);

/// Byte offsets within the mapped ring pages, returned to the application
/// by `setup` (spec.md §6) — mirrors the offsets block real
/// `io_uring_params` exposes via `io_sqring_offsets`/`io_cqring_offsets`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupParams {
    pub sq_entries: u32,
    pub cq_entries: u32,

    pub sq_off_head: u32,
    pub sq_off_tail: u32,
    pub sq_off_ring_mask: u32,
    pub sq_off_ring_entries: u32,
    pub sq_off_flags: u32,
    pub sq_off_dropped: u32,
    pub sq_off_array: u32,

    pub cq_off_head: u32,
    pub cq_off_tail: u32,
    pub cq_off_ring_mask: u32,
    pub cq_off_ring_entries: u32,
    pub cq_off_overflow: u32,
    pub cq_off_cqes: u32,
}

/// Recognized bit in the `setup` flags word.
pub mod setup_flags {
    pub const IOPOLL: u32 = 1 << 0;
}

/// Recognized bit in the `enter` flags word.
pub mod enter_flags {
    pub const GETEVENTS: u32 = 1 << 0;
}

pub const MAX_RING_ENTRIES: u32 = 4096;
