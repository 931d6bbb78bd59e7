//! The per-operation in-flight record.
//!
//! A `Request` owns exactly one file reference and one pending CQE slot
//! for the lifetime of an operation. The back-pointer to the owning Ring
//! Context named in the data model is replaced here with explicit
//! context parameters on the functions that operate on a `Request` —
//! idiomatic Rust prefers that over a raw non-owning pointer field.

use crate::entry::Sqe;
use std::sync::Arc;

pub mod request_flags {
    pub const FORCE_NONBLOCK: u32 = 1 << 0;
    pub const IOPOLL_COMPLETED: u32 = 1 << 1;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Polled,
    Callback,
}

/// An owned copy of the original SQE, captured when an operation is
/// deferred to the offload worker. The worker must never dereference
/// the application's SQ memory again once this copy exists.
#[derive(Debug, Clone, Copy)]
pub struct SubmitCopy {
    pub sqe: Sqe,
    /// Index into the SQE backing array this copy was taken from.
    pub sqe_index: u32,
    /// Write-barrier token: true once the executing context has
    /// acquired the submitting process's address space for the
    /// duration of this operation. Acquired on submit, released at
    /// completion, and must survive the hop to the offload worker
    /// thread.
    pub has_address_space: bool,
}

/// Internal in-flight record for one submitted operation.
pub struct Request<F> {
    pub file: Option<Arc<F>>,
    pub kind: RequestKind,
    pub flags: u32,
    pub user_data: u64,
    /// Result of a polled op pending publication to CQ.
    pub error: Option<i64>,
    pub submit_copy: Option<SubmitCopy>,
}

impl<F> Request<F> {
    pub fn new(kind: RequestKind) -> Self {
        Self {
            file: None,
            kind,
            flags: 0,
            user_data: 0,
            error: None,
            submit_copy: None,
        }
    }

    #[inline]
    pub fn is_force_nonblock(&self) -> bool {
        self.flags & request_flags::FORCE_NONBLOCK != 0
    }

    #[inline]
    pub fn set_force_nonblock(&mut self, v: bool) {
        if v {
            self.flags |= request_flags::FORCE_NONBLOCK;
        } else {
            self.flags &= !request_flags::FORCE_NONBLOCK;
        }
    }

    #[inline]
    pub fn is_poll_completed(&self) -> bool {
        self.flags & request_flags::IOPOLL_COMPLETED != 0
    }

    #[inline]
    pub fn set_poll_completed(&mut self, v: bool) {
        if v {
            self.flags |= request_flags::IOPOLL_COMPLETED;
        } else {
            self.flags &= !request_flags::IOPOLL_COMPLETED;
        }
    }

    /// Reset to a clean state before returning to the pool free-list.
    pub fn reset(&mut self, kind: RequestKind) {
        self.file = None;
        self.kind = kind;
        self.flags = 0;
        self.user_data = 0;
        self.error = None;
        self.submit_copy = None;
    }
}
