//! The synchronous `enter` entry point (§6): submits pending SQEs,
//! optionally waits for completions, and returns the count of
//! newly-initiated Requests. One call does the work a real
//! `io_uring_enter` syscall does in one trip — there is no perpetual
//! background loop here, matching this workspace's choice to model
//! the kernel entry point directly rather than a userspace event loop.

use ring_backend::dispatch::{dispatch_io, dispatch_nop};
use ring_backend::ring_context::RingContext;
use ring_backend::sq_ring::Reserved;
use ring_backend::submit_state::SubmitState;

use ring_core::completion::CompletionSink;
use ring_core::entry::{enter_flags, setup_flags, Opcode, Sqe};
use ring_core::error::{Result, RingError};
use ring_core::file::{FileObject, FileTable, OpOutcome};
use ring_core::notifier::Notifier;
use ring_core::request::SubmitCopy;
use ring_core::worker::{WorkerCompletion, WorkerJob, WorkerPool};

use nix::sys::signal::SigSet;
use std::sync::Arc;

/// One raw pointer/length pair describing a user-memory iovec, laid
/// out the same way a POSIX `iovec` is (a `void *` followed by a
/// `size_t`) so an SQE's `addr` can be read as a pointer to an array
/// of these.
#[repr(C)]
struct RawIoVec {
    base: u64,
    len: u64,
}

/// Import the iovec array an SQE's `addr`/`len` describe. There is one
/// process and one address space in this workspace (no separate
/// kernel/userspace split), so "does the current execution context
/// have user-address access" (§4.4.1) reduces to "is `addr` non-null";
/// the offload worker's memory-context acquisition (§4.7) is modeled
/// the same way.
///
/// # Safety
/// The caller attests `addr` points to `len` valid `RawIoVec` records
/// whose `base`/`len` in turn describe live memory for the duration of
/// the call.
unsafe fn import_read_iovecs(sqe: &Sqe) -> Option<Vec<std::io::IoSliceMut<'static>>> {
    if sqe.addr == 0 {
        return None;
    }
    let raw = std::slice::from_raw_parts(sqe.addr as *const RawIoVec, sqe.len as usize);
    Some(
        raw.iter()
            .map(|v| {
                let slice = std::slice::from_raw_parts_mut(v.base as *mut u8, v.len as usize);
                std::io::IoSliceMut::new(slice)
            })
            .collect(),
    )
}

unsafe fn import_write_iovecs(sqe: &Sqe) -> Option<Vec<std::io::IoSlice<'static>>> {
    if sqe.addr == 0 {
        return None;
    }
    let raw = std::slice::from_raw_parts(sqe.addr as *const RawIoVec, sqe.len as usize);
    Some(
        raw.iter()
            .map(|v| {
                let slice = std::slice::from_raw_parts(v.base as *const u8, v.len as usize);
                std::io::IoSlice::new(slice)
            })
            .collect(),
    )
}

/// Dispatch a non-NOP opcode against a resolved file, importing
/// iovecs as needed. Shared by the fast path and the offload worker;
/// only `nonblock` differs between the two call sites.
fn dispatch_by_opcode<F: FileObject>(op: Opcode, file: &F, sqe: &Sqe, nonblock: bool) -> OpOutcome {
    match op {
        Opcode::Readv => {
            let mut iov = unsafe { import_read_iovecs(sqe) };
            dispatch_io(file, sqe, nonblock, iov.as_deref_mut(), None)
        }
        Opcode::Writev => {
            let iov = unsafe { import_write_iovecs(sqe) };
            dispatch_io(file, sqe, nonblock, None, iov.as_deref())
        }
        Opcode::Fsync => dispatch_io(file, sqe, nonblock, None, None),
        Opcode::Nop => unreachable!("NOP never reaches per-file dispatch"),
    }
}

/// Drain previously-finished offload-worker operations into the CQ.
/// Mirrors the teacher dispatcher's "poll the result queue every
/// iteration" step, just invoked once per `enter` instead of once per
/// loop spin.
/// §4.7: acquire the submitting process's address space for the
/// duration of an offloaded operation. This workspace has exactly one
/// process and one address space, so acquisition cannot meaningfully
/// fail today — the check is still wired through `run_worker_job`
/// rather than left inert, so the fault path below is real should this
/// ever run across a process boundary.
fn acquire_address_space() -> bool {
    true
}

fn reap_worker_completions(worker_pool: &impl WorkerPool, sink: &impl CompletionSink) {
    let mut buf = [WorkerCompletion { user_data: 0, result: 0 }; 32];
    loop {
        let n = worker_pool.poll_completions(&mut buf, buf.len());
        if n == 0 {
            break;
        }
        for comp in &buf[..n] {
            let _ = sink.push(comp.user_data, comp.result, 0);
        }
        if n < buf.len() {
            break;
        }
    }
}

/// §4.4: translate up to `to_submit` SQEs into in-flight Requests.
/// Returns the count successfully initiated (pushed a completion or
/// handed to the offload worker), or the first error if none were.
pub fn submit<F, T, W, N>(ctx: &RingContext<F, T, W, N>, to_submit: u32) -> Result<u32>
where
    F: FileObject + 'static,
    T: FileTable<F>,
    W: WorkerPool,
    N: Notifier,
{
    reap_worker_completions(&ctx.worker_pool, &ctx.completion);

    let mut consumer = ctx.sq.consumer();
    let mut state = SubmitState::<F>::new(to_submit, 16);

    let mut initiated = 0u32;
    let mut first_error: Option<RingError> = None;

    for _ in 0..to_submit {
        let sqe = match consumer.reserve_one() {
            Reserved::Empty => break,
            Reserved::Dropped => break,
            Reserved::Sqe(sqe) => sqe,
        };
        state.decrement_ios_left();

        let mut req = match ctx.request_pool.get_request(Some(&mut state)) {
            Some(req) => req,
            None => {
                if initiated == 0 {
                    first_error = Some(RingError::ResourceExhausted);
                }
                break;
            }
        };
        req.user_data = sqe.user_data;

        if ctx.polled && !matches!(Opcode::from_u8(sqe.opcode), Some(Opcode::Nop)) {
            let outcome = match Opcode::from_u8(sqe.opcode) {
                None => Err(RingError::InvalidArgument),
                Some(op) => match state.resolve_file(sqe.fd as i32, &ctx.file_table) {
                    Err(e) => Err(e),
                    Ok(file) => {
                        if !file.supports_direct_io() || !file.supports_poll() {
                            Err(RingError::InvalidArgument)
                        } else {
                            req.file = Some(Arc::clone(&file));
                            Ok(dispatch_by_opcode(op, file.as_ref(), &sqe, true))
                        }
                    }
                },
            };

            match outcome {
                Ok(OpOutcome::Done(res)) => {
                    req.error = Some(res);
                    req.set_poll_completed(true);
                    let marker = req.file.as_ref().map(|f| Arc::as_ptr(f) as usize).unwrap_or(0);
                    ctx.poll_list.lock().unwrap().push_submitted(req, marker);
                    initiated += 1;
                }
                Ok(OpOutcome::WouldBlock) | Ok(OpOutcome::Queued) => {
                    req.set_poll_completed(false);
                    let marker = req.file.as_ref().map(|f| Arc::as_ptr(f) as usize).unwrap_or(0);
                    ctx.poll_list.lock().unwrap().push_submitted(req, marker);
                    initiated += 1;
                }
                Ok(OpOutcome::Err(e)) | Err(e) => {
                    if req.file.take().is_some() {
                        state.rewind_one();
                    }
                    let _ = ctx.completion.push(req.user_data, e.as_negative_errno() as i64, 0);
                    ctx.request_pool.put_request(req);
                    initiated += 1;
                }
            }
            continue;
        }

        let outcome = match Opcode::from_u8(sqe.opcode) {
            None => Err(RingError::InvalidArgument),
            Some(Opcode::Nop) => Ok(dispatch_nop(&sqe, ctx.polled)),
            Some(op) => match state.resolve_file(sqe.fd as i32, &ctx.file_table) {
                Err(e) => Err(e),
                Ok(file) => {
                    req.file = Some(Arc::clone(&file));
                    Ok(dispatch_by_opcode(op, file.as_ref(), &sqe, true))
                }
            },
        };

        match outcome {
            Ok(OpOutcome::Done(res)) => {
                let _ = ctx.completion.push(req.user_data, res, 0);
                ctx.request_pool.put_request(req);
                initiated += 1;
            }
            Ok(OpOutcome::Queued) => {
                // §4.5.2's external-callback completion path isn't
                // implemented — no bundled FileObject returns Queued
                // today. Park the Request in the Poll List rather than
                // drop it, so it stays reachable (and its reference
                // freeable) through the same harvest/teardown path a
                // polled-mode entry uses, instead of leaking.
                req.set_poll_completed(false);
                let marker = req.file.as_ref().map(|f| Arc::as_ptr(f) as usize).unwrap_or(0);
                ctx.poll_list.lock().unwrap().push_submitted(req, marker);
                initiated += 1;
            }
            Ok(OpOutcome::WouldBlock) => {
                let submit_copy = SubmitCopy { sqe, sqe_index: 0, has_address_space: acquire_address_space() };
                req.submit_copy = Some(submit_copy);
                let file = req.file.take();
                let user_data = req.user_data;
                ctx.request_pool.put_request(req);
                match file {
                    Some(file) => {
                        let job: WorkerJob = Box::new(move || run_worker_job(file, submit_copy, user_data));
                        match ctx.worker_pool.enqueue(job) {
                            Ok(()) => initiated += 1,
                            Err(e) => {
                                state.rewind_one();
                                if initiated == 0 {
                                    first_error = Some(e);
                                }
                            }
                        }
                    }
                    // NOP never blocks; reaching here would be a logic bug.
                    None => initiated += 1,
                }
            }
            Ok(OpOutcome::Err(e)) | Err(e) => {
                if req.file.take().is_some() {
                    state.rewind_one();
                }
                let _ = ctx.completion.push(req.user_data, e.as_negative_errno() as i64, 0);
                ctx.request_pool.put_request(req);
                initiated += 1;
            }
        }
    }

    consumer.commit();
    state.end(&ctx.file_table);
    ctx.completion.flush_and_notify()?;

    if initiated == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    Ok(initiated)
}

/// errno value for EFAULT, duplicated locally the way `ring-core`'s own
/// error module keeps a handful of errno constants rather than pull in
/// `libc` for them.
const EFAULT: i32 = 14;

fn run_worker_job<F: FileObject>(file: Arc<F>, copy: SubmitCopy, user_data: u64) -> WorkerCompletion {
    if !copy.has_address_space {
        return WorkerCompletion { user_data, result: RingError::Os(EFAULT).as_negative_errno() as i64 };
    }
    let sqe = copy.sqe;
    let result = match Opcode::from_u8(sqe.opcode) {
        Some(op @ (Opcode::Readv | Opcode::Writev | Opcode::Fsync)) => {
            dispatch_by_opcode(op, file.as_ref(), &sqe, false)
        }
        _ => OpOutcome::Err(RingError::InvalidArgument),
    };
    let res = match result {
        OpOutcome::Done(n) => n,
        OpOutcome::Err(e) => e.as_negative_errno() as i64,
        // A worker item never legitimately would-block; treat it as
        // the fault completion §4.7 describes for a failed address
        // space acquisition.
        OpOutcome::WouldBlock => RingError::WouldBlock.as_negative_errno() as i64,
        OpOutcome::Queued => 0,
    };
    WorkerCompletion { user_data, result: res }
}

/// §4.6: block until `min_complete` CQEs are ready, honoring
/// `enter_flags::GETEVENTS` and an optional signal mask.
///
/// Takes the whole context (rather than bare `wait_queue`/`cq`) so the
/// wait loop can reap worker completions and poll-list entries on
/// every wake — otherwise a pure `enter(to_submit=0, min_complete=1,
/// GETEVENTS)` waiting on a previously-deferred op would block on a CQ
/// that nothing is populating.
pub fn wait_for_completions<F, T, W, N>(
    ctx: &RingContext<F, T, W, N>,
    min_complete: u32,
    flags: u32,
    sigmask: Option<&SigSet>,
) -> Result<()>
where
    F: FileObject,
    T: FileTable<F>,
    W: WorkerPool,
    N: Notifier,
{
    if flags & enter_flags::GETEVENTS == 0 {
        return Ok(());
    }
    ctx.wait_queue.wait(ctx.completion.cq(), min_complete, sigmask, || {
        reap_worker_completions(&ctx.worker_pool, &ctx.completion);
        let _ = harvest_polled(ctx, 0);
    })
}

/// §4.5.1: walk the Poll List under the uring lock, harvesting
/// completed Requests until `min_complete` have been published or a
/// walk makes no progress. `spin` is only ever true when the Poll
/// List is single-file and the target count hasn't been reached yet.
pub fn harvest_polled<F, T, W, N>(ctx: &RingContext<F, T, W, N>, min_complete: u32) -> Result<u32>
where
    F: FileObject,
    T: FileTable<F>,
    W: WorkerPool,
    N: Notifier,
{
    let mut harvested = 0u32;

    loop {
        let mut done = Vec::new();

        {
            let mut list = ctx.poll_list.lock().unwrap();
            let spin = !list.poll_multi_file() && harvested < min_complete;
            let pending = list.len();
            for _ in 0..pending {
                let mut req = match list.pop_front() {
                    Some(r) => r,
                    None => break,
                };
                if req.is_poll_completed() {
                    done.push(req);
                } else {
                    match req.file.as_ref().and_then(|f| f.poll(spin)) {
                        Some(res) => {
                            req.error = Some(res);
                            req.set_poll_completed(true);
                            done.push(req);
                        }
                        None => list.requeue(req, false),
                    }
                }
                // §4.5.1: stop walking as soon as the done-list is
                // non-empty, rather than finishing every pending entry.
                if !done.is_empty() {
                    break;
                }
            }
        }

        if done.is_empty() {
            break;
        }

        harvested += done.len() as u32;
        for req in &done {
            let res = req.error.unwrap_or(0);
            let _ = ctx.completion.push(req.user_data, res, 0);
        }
        ctx.completion.flush_and_notify()?;
        ctx.request_pool.put_batch(done);

        if harvested >= min_complete {
            break;
        }
    }

    Ok(harvested)
}

/// The full `enter` call (§6): submit, then optionally wait/harvest.
pub fn enter<F, T, W, N>(
    ctx: &RingContext<F, T, W, N>,
    to_submit: u32,
    min_complete: u32,
    flags: u32,
    sigmask: Option<&SigSet>,
) -> Result<u32>
where
    F: FileObject + 'static,
    T: FileTable<F>,
    W: WorkerPool,
    N: Notifier,
{
    let submitted = submit(ctx, to_submit)?;
    if ctx.polled {
        if flags & enter_flags::GETEVENTS != 0 {
            harvest_polled(ctx, min_complete)?;
        }
    } else {
        wait_for_completions(ctx, min_complete, flags, sigmask)?;
    }
    Ok(submitted)
}

/// Reject any setup flag bit beyond the recognized ones — checked once
/// at `setup` time (§6), the way `setup_flags::IOPOLL` gates the rest
/// of the configuration.
pub fn validate_setup_flags(flags: u32) -> Result<()> {
    if flags & !setup_flags::IOPOLL != 0 {
        return Err(RingError::InvalidArgument);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_backend::ring_context::RingContextBuilder;
    use ring_backend::std_file::StdFile;
    use std::sync::Mutex;

    struct MapFileTable {
        files: Mutex<std::collections::HashMap<i32, Arc<StdFile>>>,
    }
    impl MapFileTable {
        fn new() -> Self {
            Self { files: Mutex::new(std::collections::HashMap::new()) }
        }
        fn register(&self, fd: i32, file: StdFile) {
            self.files.lock().unwrap().insert(fd, Arc::new(file));
        }
    }
    impl FileTable<StdFile> for MapFileTable {
        fn acquire_batch(&self, fd: i32, _count: u32) -> Result<Arc<StdFile>> {
            self.files.lock().unwrap().get(&fd).cloned().ok_or(RingError::BadFile)
        }
        fn release_batch(&self, _file: &Arc<StdFile>, _count: u32) {}
    }

    type TestCtx = RingContext<
        StdFile,
        MapFileTable,
        ring_backend::offload_worker::OffloadWorkerPool,
        ring_backend::eventfd_notifier::EventFdNotifier,
    >;

    fn build_ctx() -> TestCtx {
        RingContextBuilder::new()
            .sq_entries(8)
            .file_table(MapFileTable::new())
            .build()
            .unwrap()
    }

    #[test]
    fn nop_round_trip_produces_a_completion() {
        let ctx = build_ctx();
        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, Sqe::nop(0xAB));
        let n = submit(&ctx, 1).unwrap();
        assert_eq!(n, 1);

        let mut consumer = ctx.completion.cq().consumer();
        let mut out = Vec::new();
        assert_eq!(consumer.dequeue(&mut out, 4), 1);
        assert_eq!(out[0].user_data, 0xAB);
        assert_eq!(out[0].res, 0);
    }

    #[test]
    fn unknown_opcode_yields_invalid_argument_completion() {
        let ctx = build_ctx();
        let mut producer = ctx.sq.producer();
        let mut bad = Sqe::nop(5);
        bad.opcode = 200;
        producer.submit_in_order(0, bad);
        let n = submit(&ctx, 1).unwrap();
        assert_eq!(n, 1);

        let mut consumer = ctx.completion.cq().consumer();
        let mut out = Vec::new();
        consumer.dequeue(&mut out, 4);
        assert_eq!(out[0].res, RingError::InvalidArgument.as_negative_errno());
    }

    #[test]
    fn bad_fd_yields_bad_file_completion() {
        let ctx = build_ctx();
        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, ring_core::entry::Sqe::new(Opcode::Fsync, 99, 0, 3));
        let n = submit(&ctx, 1).unwrap();
        assert_eq!(n, 1);

        let mut consumer = ctx.completion.cq().consumer();
        let mut out = Vec::new();
        consumer.dequeue(&mut out, 4);
        assert_eq!(out[0].res, RingError::BadFile.as_negative_errno());
    }

    struct QueuedFsyncFile;
    impl FileObject for QueuedFsyncFile {
        fn read_vectored(&self, _off: u64, _bufs: &mut [std::io::IoSliceMut<'_>], _nonblock: bool) -> OpOutcome {
            OpOutcome::Err(RingError::InvalidArgument)
        }
        fn write_vectored(&self, _off: u64, _bufs: &[std::io::IoSlice<'_>], _nonblock: bool) -> OpOutcome {
            OpOutcome::Err(RingError::InvalidArgument)
        }
        fn fsync_range(&self, _off: u64, _len: u32, _datasync: bool, _nonblock: bool) -> OpOutcome {
            OpOutcome::Queued
        }
        fn supports_poll(&self) -> bool {
            true
        }
        fn poll(&self, _spin: bool) -> Option<i64> {
            Some(0)
        }
    }

    struct QueuedFileTable {
        files: Mutex<std::collections::HashMap<i32, Arc<QueuedFsyncFile>>>,
    }
    impl QueuedFileTable {
        fn new() -> Self {
            Self { files: Mutex::new(std::collections::HashMap::new()) }
        }
        fn register(&self, fd: i32, file: QueuedFsyncFile) {
            self.files.lock().unwrap().insert(fd, Arc::new(file));
        }
    }
    impl FileTable<QueuedFsyncFile> for QueuedFileTable {
        fn acquire_batch(&self, fd: i32, _count: u32) -> Result<Arc<QueuedFsyncFile>> {
            self.files.lock().unwrap().get(&fd).cloned().ok_or(RingError::BadFile)
        }
        fn release_batch(&self, _file: &Arc<QueuedFsyncFile>, _count: u32) {}
    }

    #[test]
    fn queued_outcome_on_a_non_polled_ring_is_recoverable_not_leaked() {
        let ctx: RingContext<
            QueuedFsyncFile,
            QueuedFileTable,
            ring_backend::offload_worker::OffloadWorkerPool,
            ring_backend::eventfd_notifier::EventFdNotifier,
        > = RingContextBuilder::new().sq_entries(4).file_table(QueuedFileTable::new()).build().unwrap();
        ctx.file_table.register(3, QueuedFsyncFile);

        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, Sqe::new(Opcode::Fsync, 3, 0, 77));
        let n = submit(&ctx, 1).unwrap();
        assert_eq!(n, 1);

        // Not dropped: still reachable through the same harvest path a
        // polled-mode entry would use.
        let harvested = harvest_polled(&ctx, 1).unwrap();
        assert_eq!(harvested, 1);

        let mut consumer = ctx.completion.cq().consumer();
        let mut out = Vec::new();
        consumer.dequeue(&mut out, 4);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_data, 77);
    }

    #[test]
    fn registered_file_fsync_completes_ok() {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!("ring-dispatcher-test-{}", std::process::id()));
        std::fs::File::create(&tmp).unwrap();

        let ctx = build_ctx();
        let file = StdFile::open(&tmp, true).unwrap();
        ctx.file_table.register(7, file);

        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, Sqe::new(Opcode::Fsync, 7, 0, 11));
        let n = submit(&ctx, 1).unwrap();
        assert_eq!(n, 1);

        // Exercises the real wait path: wait_for_completions reaps the
        // offload worker on every wake, so this does not need to poll
        // reap_worker_completions manually.
        wait_for_completions(&ctx, 1, enter_flags::GETEVENTS, None).unwrap();

        let mut consumer = ctx.completion.cq().consumer();
        let mut out = Vec::new();
        consumer.dequeue(&mut out, 4);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].user_data, 11);
        assert_eq!(out[0].res, 0);

        std::fs::remove_file(&tmp).ok();
    }
}
