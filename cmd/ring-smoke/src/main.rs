//! End-to-end smoke test for the ring setup/submit/complete/wait path.
//!
//! Each scenario below builds its own `RingContext` from scratch (real
//! setup is meant to be cheap) and drives it through `ring-dispatcher`'s
//! `submit`/`enter`/`harvest_polled`/`wait_for_completions` the same way
//! an application would, asserting on the CQEs that come back.

use ring_backend::eventfd_notifier::EventFdNotifier;
use ring_backend::offload_worker::OffloadWorkerPool;
use ring_backend::ring_context::{RingContext, RingContextBuilder};
use ring_backend::std_file::StdFile;

use ring_core::entry::{enter_flags, Opcode, Sqe};
use ring_core::error::RingError;
use ring_core::file::{FileObject, FileTable, OpOutcome};

use ring_dispatcher::{enter, harvest_polled, submit, wait_for_completions};

use std::collections::HashMap;
use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct TestRunner {
    total: u32,
    passed: u32,
    failed: u32,
}

impl TestRunner {
    const LINE: &'static str = "────────────────────────────────────────────────────────────";

    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}\n{}", name, Self::LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("[ OK] {:<52}", name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("[FAIL] {:<52} ({})", name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok {
            self.pass(name);
        } else {
            self.fail(name, reason);
        }
    }

    fn summary(&self) -> bool {
        println!("\n{}", Self::LINE);
        println!("{}/{} checks passed ({} failed)", self.passed, self.total, self.failed);
        self.failed == 0
    }
}

/// A fd-keyed file table, generic over the file object it serves, the
/// way the dispatcher's own test suite resolves fds.
struct MapFileTable<F: FileObject> {
    files: Mutex<HashMap<i32, Arc<F>>>,
}

impl<F: FileObject> MapFileTable<F> {
    fn new() -> Self {
        Self { files: Mutex::new(HashMap::new()) }
    }

    fn register(&self, fd: i32, file: F) {
        self.files.lock().unwrap().insert(fd, Arc::new(file));
    }
}

impl<F: FileObject> FileTable<F> for MapFileTable<F> {
    fn acquire_batch(&self, fd: i32, _count: u32) -> ring_core::error::Result<Arc<F>> {
        self.files.lock().unwrap().get(&fd).cloned().ok_or(RingError::BadFile)
    }
    fn release_batch(&self, _file: &Arc<F>, _count: u32) {}
}

type Ctx<F> = RingContext<F, MapFileTable<F>, OffloadWorkerPool, EventFdNotifier>;

fn build_ctx<F: FileObject>(sq_entries: u32, polled: bool) -> Ctx<F> {
    RingContextBuilder::new()
        .sq_entries(sq_entries)
        .polled(polled)
        .file_table(MapFileTable::new())
        .build()
        .unwrap()
}

/// Mirrors `RawIoVec` in `ring-dispatcher` — a smoke test has no access
/// to that private type, so it builds the same POSIX `iovec`-shaped
/// pair (a base pointer followed by a length) by hand to populate an
/// `Sqe`'s `addr`/`len`.
#[repr(C)]
struct RawIoVecBuf {
    base: u64,
    len: u64,
}

fn one_iovec(buf: &mut [u8]) -> [RawIoVecBuf; 1] {
    [RawIoVecBuf { base: buf.as_mut_ptr() as u64, len: buf.len() as u64 }]
}

/// Blocks on its first `nonblock` attempt, then completes once the
/// offload worker retries it with `nonblock = false` — the case the
/// fast path is built to defer rather than stall on.
struct FlakyFile {
    blocked_once: AtomicBool,
}

impl FlakyFile {
    fn new() -> Self {
        Self { blocked_once: AtomicBool::new(false) }
    }
}

impl FileObject for FlakyFile {
    fn read_vectored(&self, _off: u64, bufs: &mut [IoSliceMut<'_>], nonblock: bool) -> OpOutcome {
        if nonblock && !self.blocked_once.swap(true, Ordering::SeqCst) {
            return OpOutcome::WouldBlock;
        }
        let n: usize = bufs.iter().map(|b| b.len()).sum();
        OpOutcome::Done(n as i64)
    }
    fn write_vectored(&self, _off: u64, bufs: &[IoSlice<'_>], _nonblock: bool) -> OpOutcome {
        let n: usize = bufs.iter().map(|b| b.len()).sum();
        OpOutcome::Done(n as i64)
    }
    fn fsync_range(&self, _off: u64, _len: u32, _datasync: bool, _nonblock: bool) -> OpOutcome {
        OpOutcome::Done(0)
    }
}

/// A direct-I/O, poll-capable file: every read defers into the Poll
/// List on submission and resolves the moment the harvester asks.
struct PolledFile;

impl FileObject for PolledFile {
    fn read_vectored(&self, _off: u64, _bufs: &mut [IoSliceMut<'_>], _nonblock: bool) -> OpOutcome {
        OpOutcome::WouldBlock
    }
    fn write_vectored(&self, _off: u64, _bufs: &[IoSlice<'_>], _nonblock: bool) -> OpOutcome {
        OpOutcome::WouldBlock
    }
    fn fsync_range(&self, _off: u64, _len: u32, _datasync: bool, _nonblock: bool) -> OpOutcome {
        OpOutcome::Done(0)
    }
    fn supports_direct_io(&self) -> bool {
        true
    }
    fn supports_poll(&self) -> bool {
        true
    }
    fn poll(&self, _spin: bool) -> Option<i64> {
        Some(4)
    }
}

fn scenario_nop_harvest(t: &mut TestRunner) {
    t.section("Scenario 1: setup + NOP + harvest");
    let ctx: Ctx<StdFile> = build_ctx(4, false);

    {
        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, Sqe::nop(0xA1));
    }

    let n = match enter(&ctx, 1, 1, enter_flags::GETEVENTS, None) {
        Ok(n) => n,
        Err(e) => {
            t.fail("enter() submits the NOP", &e.to_string());
            return;
        }
    };
    t.check("enter() reports 1 submitted", n == 1, "expected return value 1");

    let mut out = Vec::new();
    ctx.completion.cq().consumer().dequeue(&mut out, 4);
    t.check("exactly one CQE landed", out.len() == 1, "expected 1 CQE");
    if let Some(cqe) = out.first() {
        t.check("CQE.user_data echoes the SQE", cqe.user_data == 0xA1, "user_data mismatch");
        t.check("CQE.res == 0", cqe.res == 0, "expected res == 0");
        t.check("CQE.flags == 0", cqe.flags == 0, "expected flags == 0");
    }
}

fn scenario_invalid_opcode(t: &mut TestRunner) {
    t.section("Scenario 2: invalid opcode");
    let ctx: Ctx<StdFile> = build_ctx(4, false);

    {
        let mut producer = ctx.sq.producer();
        let mut bad = Sqe::nop(0xBB);
        bad.opcode = 99;
        producer.submit_in_order(0, bad);
    }

    let n = submit(&ctx, 1).unwrap();
    t.check("submit() still reports 1 initiated", n == 1, "an invalid opcode still completes");

    let mut out = Vec::new();
    ctx.completion.cq().consumer().dequeue(&mut out, 4);
    t.check("one CQE landed", out.len() == 1, "expected 1 CQE");
    if let Some(cqe) = out.first() {
        t.check("CQE.user_data echoes the SQE", cqe.user_data == 0xBB, "user_data mismatch");
        t.check(
            "CQE.res == -EINVAL",
            cqe.res == RingError::InvalidArgument.as_negative_errno(),
            "expected -EINVAL",
        );
    }
}

fn scenario_would_block_deferral(t: &mut TestRunner) {
    t.section("Scenario 3: would-block deferral to the offload worker");
    let ctx: Ctx<FlakyFile> = build_ctx(4, false);
    ctx.file_table.register(5, FlakyFile::new());

    let mut buf = [0u8; 4];
    let iov = one_iovec(&mut buf);
    {
        let mut producer = ctx.sq.producer();
        let mut sqe = Sqe::new(Opcode::Readv, 5, 0, 0xC1);
        sqe.addr = iov.as_ptr() as u64;
        sqe.len = 1;
        producer.submit_in_order(0, sqe);
    }

    let n = submit(&ctx, 1).unwrap();
    t.check("submit() returns immediately with 1 initiated", n == 1, "deferral should still count as initiated");

    let mut out = Vec::new();
    for _ in 0..200 {
        let _ = submit(&ctx, 0);
        ctx.completion.cq().consumer().dequeue(&mut out, 4);
        if !out.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    t.check("the deferred read eventually completes", out.len() == 1, "worker never published a CQE");
    if let Some(cqe) = out.first() {
        t.check("CQE.user_data echoes the SQE", cqe.user_data == 0xC1, "user_data mismatch");
        t.check("CQE.res carries the byte count", cqe.res == 4, "expected res == 4");
    }
}

fn scenario_polled_direct_io(t: &mut TestRunner) {
    t.section("Scenario 4: polled mode with direct I/O");
    let ctx: Ctx<PolledFile> = build_ctx(8, true);
    ctx.file_table.register(9, PolledFile);

    let mut bufs: Vec<[u8; 4]> = vec![[0u8; 4]; 4];
    let mut iovecs: Vec<[RawIoVecBuf; 1]> = Vec::with_capacity(4);
    for buf in bufs.iter_mut() {
        iovecs.push(one_iovec(buf));
    }

    {
        let mut producer = ctx.sq.producer();
        for (i, iov) in iovecs.iter().enumerate() {
            let mut sqe = Sqe::new(Opcode::Readv, 9, 0, 0xD0 + i as u64);
            sqe.addr = iov.as_ptr() as u64;
            sqe.len = 1;
            producer.submit(i as u32, sqe);
        }
        producer.publish();
    }

    let n = submit(&ctx, 4).unwrap();
    t.check("all 4 polled reads are accepted", n == 4, "expected 4 initiated");

    let harvested = harvest_polled(&ctx, 4).unwrap();
    t.check("harvest_polled() drains all 4", harvested == 4, "expected harvested == 4");

    let mut out = Vec::new();
    ctx.completion.cq().consumer().dequeue(&mut out, 8);
    t.check("4 CQEs are present", out.len() == 4, "expected 4 CQEs (order not guaranteed)");
    let mut seen: Vec<u64> = out.iter().map(|c| c.user_data).collect();
    seen.sort_unstable();
    t.check(
        "user_data values match the 4 submitted reads",
        seen == vec![0xD0, 0xD1, 0xD2, 0xD3],
        "user_data set mismatch",
    );
}

fn scenario_cq_overflow(t: &mut TestRunner) {
    t.section("Scenario 5: CQ overflow");
    let ctx: Ctx<StdFile> = build_ctx(2, false);
    t.check("CQ is sized 2x SQ by default", ctx.completion.cq().cq_entries() == 4, "expected cq_entries == 4");

    for i in 0..5u64 {
        {
            let mut producer = ctx.sq.producer();
            producer.submit_in_order(0, Sqe::nop(0x100 + i));
        }
        submit(&ctx, 1).unwrap();
    }

    t.check(
        "overflow counter observed at least one drop",
        ctx.completion.cq().overflow() >= 1,
        "expected overflow >= 1",
    );

    let mut out = Vec::new();
    ctx.completion.cq().consumer().dequeue(&mut out, 8);
    t.check("CQ holds at most 4 entries", out.len() <= 4, "CQ exceeded its capacity");
}

fn scenario_interrupted_wait(t: &mut TestRunner) {
    t.section("Scenario 6: signal-interrupted wait");
    let ctx: Ctx<StdFile> = build_ctx(4, false);

    let wq = &ctx.wait_queue;

    std::thread::scope(|scope| {
        scope.spawn(|| {
            std::thread::sleep(Duration::from_millis(20));
            wq.raise_interrupt();
        });
        let result = wait_for_completions(&ctx, 1, enter_flags::GETEVENTS, None);
        t.check(
            "wait on an empty CQ reports Interrupted",
            matches!(result, Err(RingError::Interrupted)),
            "expected Err(RingError::Interrupted)",
        );
    });

    {
        let mut producer = ctx.sq.producer();
        producer.submit_in_order(0, Sqe::nop(0xE1));
    }
    submit(&ctx, 1).unwrap();

    let result = wait_for_completions(&ctx, 1, enter_flags::GETEVENTS, None);
    t.check("a subsequent wait completes normally", result.is_ok(), "expected Ok(())");
}

fn main() {
    let mut t = TestRunner::new();

    scenario_nop_harvest(&mut t);
    scenario_invalid_opcode(&mut t);
    scenario_would_block_deferral(&mut t);
    scenario_polled_direct_io(&mut t);
    scenario_cq_overflow(&mut t);
    scenario_interrupted_wait(&mut t);

    if !t.summary() {
        std::process::exit(1);
    }
}
