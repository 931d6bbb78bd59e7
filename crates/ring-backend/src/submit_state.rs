//! Submit State (§3, §4.3): per-enter scratch shared across one batch
//! of SQEs — a cached file reference for fd-reuse batching, a local
//! cache of free `Request` records, and the `ios_left` accounting the
//! submit pipeline consults.

use ring_core::file::{FileObject, FileTable};
use ring_core::request::Request;

use std::sync::Arc;

struct CachedFile<F> {
    fd: i32,
    file: Arc<F>,
    /// References acquired but not yet consumed by a submitted SQE.
    to_release: u32,
}

pub struct SubmitState<F> {
    cached_file: Option<CachedFile<F>>,
    /// Local free-list of `Request` records refilled in bulk from the
    /// global pool (§4.2).
    cached_requests: Vec<Box<Request<F>>>,
    cache_capacity: usize,
    /// Remaining SQEs in this batch; bounds how many file references
    /// a single batched acquire should grab.
    ios_left: u32,
}

impl<F: FileObject> SubmitState<F> {
    pub fn new(ios_left: u32, cache_capacity: usize) -> Self {
        Self {
            cached_file: None,
            cached_requests: Vec::with_capacity(cache_capacity),
            cache_capacity,
            ios_left,
        }
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    pub fn ios_left(&self) -> u32 {
        self.ios_left
    }

    pub fn decrement_ios_left(&mut self) {
        self.ios_left = self.ios_left.saturating_sub(1);
    }

    pub fn pop_cached_request(&mut self) -> Option<Box<Request<F>>> {
        self.cached_requests.pop()
    }

    pub fn push_cached_request(&mut self, req: Box<Request<F>>) {
        self.cached_requests.push(req);
    }

    /// §4.3: reuse the cached file for `fd` if present, otherwise
    /// flush the stale cache entry and acquire up to `ios_left`
    /// references in one batched call.
    pub fn resolve_file(&mut self, fd: i32, table: &dyn FileTable<F>) -> ring_core::error::Result<Arc<F>> {
        if let Some(cached) = &mut self.cached_file {
            if cached.fd == fd && cached.to_release > 0 {
                cached.to_release -= 1;
                return Ok(Arc::clone(&cached.file));
            }
        }

        self.flush_cached_file(table);

        let batch = self.ios_left.max(1);
        let file = table.acquire_batch(fd, batch)?;
        self.cached_file = Some(CachedFile {
            fd,
            file: Arc::clone(&file),
            // One reference was just consumed by this call.
            to_release: batch.saturating_sub(1),
        });
        Ok(file)
    }

    /// Flush the cached file reference, releasing whatever batch
    /// count is left unconsumed back to the file table.
    pub fn flush_cached_file(&mut self, table: &dyn FileTable<F>) {
        if let Some(cached) = self.cached_file.take() {
            if cached.to_release > 0 {
                table.release_batch(&cached.file, cached.to_release);
            }
        }
    }

    /// On a failed submission that never consumed the reference it
    /// took from the cache, give it back so the cache does not leak.
    pub fn rewind_one(&mut self) {
        if let Some(cached) = &mut self.cached_file {
            cached.to_release += 1;
        }
    }

    /// End-of-batch teardown: flush any remaining cached file
    /// reference (§4.4 step 4).
    pub fn end(&mut self, table: &dyn FileTable<F>) {
        self.flush_cached_file(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_core::error::Result;
    use ring_core::file::OpOutcome;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct DummyFile(i32);
    impl FileObject for DummyFile {
        fn read_vectored(&self, _off: u64, _bufs: &mut [std::io::IoSliceMut<'_>], _nonblock: bool) -> OpOutcome {
            OpOutcome::Done(0)
        }
        fn write_vectored(&self, _off: u64, _bufs: &[std::io::IoSlice<'_>], _nonblock: bool) -> OpOutcome {
            OpOutcome::Done(0)
        }
        fn fsync_range(&self, _off: u64, _len: u32, _datasync: bool, _nonblock: bool) -> OpOutcome {
            OpOutcome::Done(0)
        }
    }

    struct CountingTable {
        acquires: AtomicU32,
        releases: AtomicU32,
    }
    impl FileTable<DummyFile> for CountingTable {
        fn acquire_batch(&self, fd: i32, count: u32) -> Result<Arc<DummyFile>> {
            self.acquires.fetch_add(count, Ordering::SeqCst);
            Ok(Arc::new(DummyFile(fd)))
        }
        fn release_batch(&self, _file: &Arc<DummyFile>, count: u32) {
            self.releases.fetch_add(count, Ordering::SeqCst);
        }
    }

    #[test]
    fn reuses_cached_fd_without_reacquiring() {
        let table = CountingTable { acquires: AtomicU32::new(0), releases: AtomicU32::new(0) };
        let mut state = SubmitState::<DummyFile>::new(4, 8);

        let a = state.resolve_file(5, &table).unwrap();
        let b = state.resolve_file(5, &table).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(table.acquires.load(Ordering::SeqCst), 4);

        state.end(&table);
        assert_eq!(table.releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn switching_fd_flushes_old_cache() {
        let table = CountingTable { acquires: AtomicU32::new(0), releases: AtomicU32::new(0) };
        let mut state = SubmitState::<DummyFile>::new(2, 8);

        state.resolve_file(1, &table).unwrap();
        state.resolve_file(2, &table).unwrap();
        assert_eq!(table.releases.load(Ordering::SeqCst), 1);
        state.end(&table);
        assert_eq!(table.releases.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rewind_restores_a_failed_submission_reference() {
        let table = CountingTable { acquires: AtomicU32::new(0), releases: AtomicU32::new(0) };
        let mut state = SubmitState::<DummyFile>::new(4, 8);
        state.resolve_file(5, &table).unwrap();
        state.rewind_one();
        state.end(&table);
        // 4 acquired, only 3 actually consumed (1 held + 1 rewound released together).
        assert_eq!(table.releases.load(Ordering::SeqCst), 4);
    }
}
