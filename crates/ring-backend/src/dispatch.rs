//! Per-opcode submit dispatch (§4.4.1): turns one `Sqe` plus a
//! resolved `FileObject` into an `OpOutcome`. Shared verbatim by the
//! inline fast path (`force_nonblock = true`) and the offload worker
//! (`force_nonblock = false`).

use ring_core::entry::{fsync_flags, Opcode, Sqe};
use ring_core::error::RingError;
use ring_core::file::{FileObject, OpOutcome};

/// NOP never touches a file; it is its own complete dispatch.
pub fn dispatch_nop(sqe: &Sqe, polled: bool) -> OpOutcome {
    if polled {
        return OpOutcome::Err(RingError::InvalidArgument);
    }
    let _ = sqe;
    OpOutcome::Done(0)
}

/// Dispatch READV/WRITEV/FSYNC against a resolved file. `import_iovecs`
/// gives the submit pipeline's own user-address-space import result —
/// `None` means the current execution context has no user-address
/// access (e.g. an offload worker that failed to acquire the
/// submitting process's memory context, §4.7).
pub fn dispatch_io(
    file: &dyn FileObject,
    sqe: &Sqe,
    nonblock: bool,
    iovecs: Option<&mut [std::io::IoSliceMut<'_>]>,
    write_iovecs: Option<&[std::io::IoSlice<'_>]>,
) -> OpOutcome {
    let opcode = match Opcode::from_u8(sqe.opcode) {
        Some(op) => op,
        None => return OpOutcome::Err(RingError::InvalidArgument),
    };

    match opcode {
        Opcode::Nop => OpOutcome::Err(RingError::InvalidArgument),
        Opcode::Readv => match iovecs {
            Some(bufs) => file.read_vectored(sqe.off, bufs, nonblock),
            None => OpOutcome::Err(RingError::BadFile),
        },
        Opcode::Writev => match write_iovecs {
            Some(bufs) => file.write_vectored(sqe.off, bufs, nonblock),
            None => OpOutcome::Err(RingError::BadFile),
        },
        Opcode::Fsync => {
            let datasync = sqe.op_flags & fsync_flags::DATASYNC != 0;
            file.fsync_range(sqe.off, sqe.len, datasync, nonblock)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_core::entry::Sqe;

    struct AlwaysBlocking;
    impl FileObject for AlwaysBlocking {
        fn read_vectored(&self, _off: u64, _bufs: &mut [std::io::IoSliceMut<'_>], nonblock: bool) -> OpOutcome {
            if nonblock { OpOutcome::WouldBlock } else { OpOutcome::Done(4) }
        }
        fn write_vectored(&self, _off: u64, _bufs: &[std::io::IoSlice<'_>], nonblock: bool) -> OpOutcome {
            if nonblock { OpOutcome::WouldBlock } else { OpOutcome::Done(4) }
        }
        fn fsync_range(&self, _off: u64, _len: u32, _datasync: bool, _nonblock: bool) -> OpOutcome {
            OpOutcome::Done(0)
        }
    }

    #[test]
    fn nop_completes_with_zero() {
        let sqe = Sqe::nop(7);
        assert_eq!(dispatch_nop(&sqe, false), OpOutcome::Done(0));
    }

    #[test]
    fn nop_rejected_in_polled_mode() {
        let sqe = Sqe::nop(7);
        assert_eq!(dispatch_nop(&sqe, true), OpOutcome::Err(RingError::InvalidArgument));
    }

    #[test]
    fn readv_defers_on_would_block_then_succeeds_blocking() {
        let file = AlwaysBlocking;
        let sqe = Sqe::new(Opcode::Readv, 3, 0, 1);
        let mut buf = [0u8; 4];
        let mut iov = [std::io::IoSliceMut::new(&mut buf)];
        assert_eq!(
            dispatch_io(&file, &sqe, true, Some(&mut iov), None),
            OpOutcome::WouldBlock
        );
        let mut iov2 = [std::io::IoSliceMut::new(&mut buf)];
        assert_eq!(
            dispatch_io(&file, &sqe, false, Some(&mut iov2), None),
            OpOutcome::Done(4)
        );
    }

    #[test]
    fn readv_without_address_space_is_bad_file() {
        let file = AlwaysBlocking;
        let sqe = Sqe::new(Opcode::Readv, 3, 0, 1);
        assert_eq!(dispatch_io(&file, &sqe, false, None, None), OpOutcome::Err(RingError::BadFile));
    }
}
