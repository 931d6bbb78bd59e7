//! Request Pool (§4.2): amortized-O(1) allocate/free for in-flight
//! `Request` records, aware that allocation may fail under load.

use ring_core::request::{Request, RequestKind};

use crossbeam_queue::ArrayQueue;
use std::sync::Arc;

use crate::refcount::ContextRefCount;
use crate::submit_state::SubmitState;

/// Global free-list of boxed, reset `Request` records. Bulk refill
/// moves several records from the global list into a per-enter
/// `SubmitState` cache at once, so repeated `get_request` calls
/// within one batch don't each pay the global-queue contention cost.
pub struct RequestPool<F> {
    free: ArrayQueue<Box<Request<F>>>,
    refs: Arc<ContextRefCount>,
}

impl<F> RequestPool<F> {
    pub fn new(capacity: usize, refs: Arc<ContextRefCount>) -> Self {
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            let _ = free.push(Box::new(Request::new(RequestKind::Callback)));
        }
        Self { free, refs }
    }

    /// §4.2 `get_request`: with a `SubmitState`, first drain its local
    /// cache; if empty, refill from the global pool with up to
    /// `min(remaining-in-batch, cache capacity)` records. Without a
    /// state, single-alloc directly from the global pool.
    ///
    /// Each successful get takes one context reference; the caller
    /// must `put_request` to release it, even on the error paths of
    /// the submit pipeline.
    pub fn get_request(&self, state: Option<&mut SubmitState<F>>) -> Option<Box<Request<F>>> {
        if !self.refs.get() {
            return None;
        }

        let req = match state {
            Some(state) => {
                if let Some(req) = state.pop_cached_request() {
                    Some(req)
                } else {
                    let refill = state.cache_capacity().min(state.ios_left() as usize);
                    for _ in 0..refill {
                        match self.free.pop() {
                            Some(req) => state.push_cached_request(req),
                            None => break,
                        }
                    }
                    state.pop_cached_request().or_else(|| self.free.pop())
                }
            }
            None => self.free.pop(),
        };

        if req.is_none() {
            self.refs.put();
        }
        req
    }

    pub fn put_request(&self, mut req: Box<Request<F>>) {
        req.reset(RequestKind::Callback);
        let _ = self.free.push(req);
        self.refs.put();
    }

    /// Bulk put, used by the polled completion path (§4.5.1) so a
    /// full done-list batch releases its context references together.
    pub fn put_batch(&self, reqs: impl IntoIterator<Item = Box<Request<F>>>) {
        for req in reqs {
            self.put_request(req);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyFile;

    #[test]
    fn get_and_put_round_trip() {
        let refs = Arc::new(ContextRefCount::new());
        let pool = RequestPool::<DummyFile>::new(4, Arc::clone(&refs));
        let req = pool.get_request(None).unwrap();
        assert_eq!(refs.current(), 1);
        pool.put_request(req);
        assert_eq!(refs.current(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn exhausted_pool_returns_none_without_leaking_a_ref() {
        let refs = Arc::new(ContextRefCount::new());
        let pool = RequestPool::<DummyFile>::new(1, Arc::clone(&refs));
        let a = pool.get_request(None).unwrap();
        let b = pool.get_request(None);
        assert!(b.is_none());
        assert_eq!(refs.current(), 1);
        pool.put_request(a);
    }
}
