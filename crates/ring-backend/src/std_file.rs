//! `StdFile` — default `FileObject` implementation, backed by a raw
//! fd and the `nix` pread/pwrite/fsync family. All calls here are
//! genuinely synchronous; `nonblock` only matters for callers that
//! opened the fd with `O_NONBLOCK`, which `StdFile` does not require —
//! in this workspace the submit pipeline's own fast-path/offload-worker
//! split is what provides non-blocking behavior, not the fd mode.

use ring_core::error::RingError;
use ring_core::file::{FileObject, OpOutcome};

use nix::sys::stat::fstat;
use std::os::unix::io::{AsRawFd, RawFd};

pub struct StdFile {
    fd: RawFd,
    direct_io: bool,
    owned: bool,
}

impl StdFile {
    /// Wrap a raw fd already opened by the caller. `direct_io` should
    /// reflect whether it was opened with `O_DIRECT` — a precondition
    /// for acceptance in polled mode (§4.4.2).
    pub fn from_raw_fd(fd: RawFd, direct_io: bool, owned: bool) -> Self {
        Self { fd, direct_io, owned }
    }

    pub fn open(path: &std::path::Path, write: bool) -> std::io::Result<Self> {
        use std::fs::OpenOptions;
        let file = OpenOptions::new().read(true).write(write).open(path)?;
        let fd = file.as_raw_fd();
        std::mem::forget(file);
        Ok(Self::from_raw_fd(fd, false, true))
    }

    fn errno_to_ring_error(errno: i32) -> RingError {
        RingError::Os(errno)
    }
}

impl FileObject for StdFile {
    fn read_vectored(&self, off: u64, bufs: &mut [std::io::IoSliceMut<'_>], _nonblock: bool) -> OpOutcome {
        match nix::sys::uio::preadv(self.fd, bufs, off as i64) {
            Ok(n) => OpOutcome::Done(n as i64),
            Err(nix::errno::Errno::EAGAIN) => OpOutcome::WouldBlock,
            Err(e) => OpOutcome::Err(Self::errno_to_ring_error(e as i32)),
        }
    }

    fn write_vectored(&self, off: u64, bufs: &[std::io::IoSlice<'_>], _nonblock: bool) -> OpOutcome {
        match nix::sys::uio::pwritev(self.fd, bufs, off as i64) {
            Ok(n) => OpOutcome::Done(n as i64),
            Err(nix::errno::Errno::EAGAIN) => OpOutcome::WouldBlock,
            Err(e) => OpOutcome::Err(Self::errno_to_ring_error(e as i32)),
        }
    }

    fn fsync_range(&self, off: u64, len: u32, datasync: bool, nonblock: bool) -> OpOutcome {
        if nonblock {
            // §4.4.1: fsync always returns would-block on the fast path.
            return OpOutcome::WouldBlock;
        }
        let ret = if datasync {
            unsafe { libc::fdatasync(self.fd) }
        } else {
            unsafe { libc::fsync(self.fd) }
        };
        let _ = (off, len);
        if ret == 0 {
            OpOutcome::Done(0)
        } else {
            OpOutcome::Err(Self::errno_to_ring_error(unsafe { *libc::__errno_location() }))
        }
    }

    fn supports_direct_io(&self) -> bool {
        self.direct_io
    }

    fn supports_poll(&self) -> bool {
        false
    }
}

impl Drop for StdFile {
    fn drop(&mut self) {
        if self.owned {
            unsafe {
                libc::close(self.fd);
            }
        }
    }
}

/// Used only so tests can confirm the fd is a regular file.
pub fn is_regular_file(fd: RawFd) -> bool {
    fstat(fd).map(|st| (st.st_mode & libc::S_IFMT) == libc::S_IFREG).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn write_then_read_round_trips() {
        let mut tmp = tempfile_path();
        {
            let mut f = std::fs::File::create(&tmp).unwrap();
            f.write_all(b"hello").unwrap();
        }
        let file = StdFile::open(&tmp, true).unwrap();
        assert!(is_regular_file(file.fd));

        let mut buf = [0u8; 5];
        let mut iov = [std::io::IoSliceMut::new(&mut buf)];
        match file.read_vectored(0, &mut iov, false) {
            OpOutcome::Done(n) => assert_eq!(n, 5),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(&buf, b"hello");
        std::fs::remove_file(&tmp).ok();
    }

    #[test]
    fn fsync_nonblock_always_would_block() {
        let tmp = tempfile_path();
        std::fs::File::create(&tmp).unwrap();
        let file = StdFile::open(&tmp, true).unwrap();
        assert_eq!(file.fsync_range(0, 0, false, true), OpOutcome::WouldBlock);
        assert_eq!(file.fsync_range(0, 0, false, false), OpOutcome::Done(0));
        std::fs::remove_file(&tmp).ok();
    }

    fn tempfile_path() -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("ring-backend-test-{}-{}", std::process::id(), unique()));
        p
    }

    fn unique() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }
}
