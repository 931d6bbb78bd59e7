//! Poll List (§4.4.2, §4.5.1): the set of in-flight polled Requests,
//! with O(1) push-front and push-back so newly-completed entries can
//! be promoted ahead of still-pending ones during a harvest walk.
//!
//! A `VecDeque` gives O(1) amortized push/pop at both ends, which is
//! all the ordering contract needs; no intrusive linked list required.

use ring_core::request::Request;
use std::collections::VecDeque;

pub struct PollList<F> {
    entries: VecDeque<Box<Request<F>>>,
    /// Set once more than one distinct file is present among pending
    /// entries; toggles the harvester's spin-vs-check policy (§4.5.1).
    poll_multi_file: bool,
    last_fd_marker: Option<usize>,
}

impl<F> PollList<F> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            poll_multi_file: false,
            last_fd_marker: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn poll_multi_file(&self) -> bool {
        self.poll_multi_file
    }

    /// Insert a freshly-submitted polled Request. `file_marker`
    /// identifies the underlying file (e.g. its `Arc` pointer cast to
    /// `usize`); used only to decide `poll_multi_file`.
    pub fn push_submitted(&mut self, req: Box<Request<F>>, file_marker: usize) {
        if let Some(last) = self.last_fd_marker {
            if last != file_marker {
                self.poll_multi_file = true;
            }
        }
        self.last_fd_marker = Some(file_marker);
        self.entries.push_back(req);
    }

    /// Pop the front entry for the harvester's walk.
    pub fn pop_front(&mut self) -> Option<Box<Request<F>>> {
        self.entries.pop_front()
    }

    /// A Request observed complete during the walk goes back to the
    /// front (§4.4.2: "newly-observed-complete Requests go to the
    /// front"); otherwise the back.
    pub fn requeue(&mut self, req: Box<Request<F>>, completed: bool) {
        if completed {
            self.entries.push_front(req);
        } else {
            self.entries.push_back(req);
        }
    }
}

impl<F> Default for PollList<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring_core::request::RequestKind;

    #[test]
    fn completed_requeue_goes_to_front() {
        let mut list = PollList::<()>::new();
        list.push_submitted(Box::new(Request::new(RequestKind::Polled)), 1);
        list.push_submitted(Box::new(Request::new(RequestKind::Polled)), 1);

        let mut first = list.pop_front().unwrap();
        let mut second = list.pop_front().unwrap();
        first.user_data = 1;
        second.user_data = 2;
        // second observed complete, first still pending: second jumps ahead.
        list.requeue(first, false);
        list.requeue(second, true);

        assert_eq!(list.pop_front().unwrap().user_data, 2);
        assert_eq!(list.pop_front().unwrap().user_data, 1);
    }

    #[test]
    fn multi_file_flag_set_on_second_distinct_fd() {
        let mut list = PollList::<()>::new();
        list.push_submitted(Box::new(Request::new(RequestKind::Polled)), 1);
        assert!(!list.poll_multi_file());
        list.push_submitted(Box::new(Request::new(RequestKind::Polled)), 2);
        assert!(list.poll_multi_file());
    }
}
