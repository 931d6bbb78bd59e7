//! `OffloadWorkerPool` — default `WorkerPool` implementation (§4.7).
//!
//! Spawns N OS threads at creation. Workers dequeue `WorkerJob`
//! closures from a lock-free MPMC queue, run them to completion
//! (blocking is expected and fine), and push the resulting
//! `WorkerCompletion` to a lock-free result queue. The dispatcher
//! drains the result queue non-blockingly.
//!
//! No dynamic scaling. Simple, predictable, safe.

use ring_core::error::{Result, RingError};
use ring_core::worker::{WorkerCompletion, WorkerJob, WorkerPool};

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

struct PoolInner {
    work_queue: ArrayQueue<WorkerJob>,
    result_queue: ArrayQueue<WorkerCompletion>,
    active: AtomicUsize,
    shutdown: AtomicBool,
    total: usize,
}

pub struct OffloadWorkerPool {
    inner: Arc<PoolInner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl OffloadWorkerPool {
    pub fn new(n: usize, queue_depth: usize) -> Self {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            work_queue: ArrayQueue::new(queue_depth),
            result_queue: ArrayQueue::new(queue_depth),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            total: n,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("ring-worker-{}", worker_id))
                .spawn(move || worker_loop(inner, worker_id))
                .expect("failed to spawn offload worker thread");
            handles.push(handle);
        }

        OffloadWorkerPool { inner, handles }
    }

    /// §4.7 sizing: `min(sq_entries - 1, 2 * online_cpus)`.
    pub fn sized_for_sq(sq_entries: u32, queue_depth: usize) -> Self {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let n = (sq_entries.saturating_sub(1) as usize).min(2 * cpus).max(1);
        Self::new(n, queue_depth)
    }
}

impl WorkerPool for OffloadWorkerPool {
    fn enqueue(&self, job: WorkerJob) -> Result<()> {
        if self.inner.shutdown.load(Ordering::Relaxed) {
            return Err(RingError::ResourceExhausted);
        }
        self.inner
            .work_queue
            .push(job)
            .map_err(|_| RingError::ResourceExhausted)
    }

    fn poll_completions(&self, buf: &mut [WorkerCompletion], max: usize) -> usize {
        let mut count = 0;
        while count < max && count < buf.len() {
            match self.inner.result_queue.pop() {
                Some(comp) => {
                    buf[count] = comp;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn total_workers(&self) -> usize {
        self.inner.total
    }

    fn max_workers(&self) -> usize {
        self.inner.total
    }

    fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Drop for OffloadWorkerPool {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>, _worker_id: usize) {
    loop {
        match inner.work_queue.pop() {
            Some(job) => {
                inner.active.fetch_add(1, Ordering::Relaxed);
                let completion = job();
                inner.active.fetch_sub(1, Ordering::Relaxed);

                let mut pending = completion;
                loop {
                    match inner.result_queue.push(pending) {
                        Ok(()) => break,
                        Err(back) => {
                            pending = back;
                            if inner.shutdown.load(Ordering::Relaxed) {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                }
            }
            None => {
                if inner.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                thread::park_timeout(std::time::Duration::from_millis(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_runs_and_completes() {
        let pool = OffloadWorkerPool::new(2, 16);
        pool.enqueue(Box::new(|| WorkerCompletion { user_data: 42, result: 7 }))
            .unwrap();

        let mut buf = [WorkerCompletion { user_data: 0, result: 0 }; 4];
        let mut got = 0;
        for _ in 0..200 {
            got = pool.poll_completions(&mut buf, 4);
            if got > 0 {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(got, 1);
        assert_eq!(buf[0].user_data, 42);
        assert_eq!(buf[0].result, 7);
    }

    #[test]
    fn sized_for_sq_respects_both_bounds() {
        let pool = OffloadWorkerPool::sized_for_sq(4, 16);
        assert!(pool.total_workers() <= 3);
        assert!(pool.total_workers() >= 1);
    }

    #[test]
    fn enqueue_after_shutdown_is_resource_exhausted() {
        let pool = OffloadWorkerPool::new(1, 4);
        pool.shutdown();
        let err = pool
            .enqueue(Box::new(|| WorkerCompletion { user_data: 1, result: 0 }))
            .unwrap_err();
        assert!(matches!(err, RingError::ResourceExhausted));
    }
}
