//! Two-phase teardown counter (§4.8): a percpu-style reference counter
//! guarding the context. `get_request`/`enter` each take one reference;
//! teardown marks the counter "dead" so no new references are handed
//! out, then waits for the count to drain to zero.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Condvar;
use std::sync::Mutex;

pub struct ContextRefCount {
    count: AtomicUsize,
    killed: AtomicBool,
    drained: Mutex<()>,
    drained_cv: Condvar,
}

impl ContextRefCount {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            killed: AtomicBool::new(false),
            drained: Mutex::new(()),
            drained_cv: Condvar::new(),
        }
    }

    /// Take a reference. Returns `false` (no reference taken) once the
    /// context has been marked for kill.
    pub fn get(&self) -> bool {
        if self.killed.load(Ordering::Acquire) {
            return false;
        }
        self.count.fetch_add(1, Ordering::AcqRel);
        if self.killed.load(Ordering::Acquire) {
            self.put();
            return false;
        }
        true
    }

    pub fn put(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.killed.load(Ordering::Acquire) {
            let _guard = self.drained.lock().unwrap();
            self.drained_cv.notify_all();
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    /// Mark the context dead: no further `get()` will succeed. Does not
    /// block — callers that need the two-phase ordering in §4.8 (mark,
    /// then drain the Poll List, then wait) call this before the drain
    /// step and `wait_for_zero` after it.
    pub fn mark_dead(&self) {
        self.killed.store(true, Ordering::Release);
    }

    /// Block until every outstanding reference has been `put()` back.
    /// Only meaningful after `mark_dead`, otherwise a steady stream of
    /// new references could keep the count from ever reaching zero.
    pub fn wait_for_zero(&self) {
        let guard = self.drained.lock().unwrap();
        let _unused = self
            .drained_cv
            .wait_while(guard, |_| self.count.load(Ordering::Acquire) != 0)
            .unwrap();
    }
}

impl Default for ContextRefCount {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn get_put_balances() {
        let rc = ContextRefCount::new();
        assert!(rc.get());
        assert!(rc.get());
        assert_eq!(rc.current(), 2);
        rc.put();
        rc.put();
        assert_eq!(rc.current(), 0);
    }

    #[test]
    fn kill_rejects_new_references() {
        let rc = ContextRefCount::new();
        assert!(rc.get());
        rc.put();
        rc.mark_dead();
        rc.wait_for_zero();
        assert!(!rc.get());
    }

    #[test]
    fn kill_waits_for_outstanding_refs() {
        let rc = Arc::new(ContextRefCount::new());
        assert!(rc.get());
        let rc2 = Arc::clone(&rc);
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            rc2.put();
        });
        rc.mark_dead();
        rc.wait_for_zero();
        handle.join().unwrap();
        assert_eq!(rc.current(), 0);
    }
}
