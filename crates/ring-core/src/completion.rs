//! Completion delivery abstraction.
//!
//! A `CompletionSink` writes CQEs into the CQ and notifies the
//! application. The default implementation (`ring-backend`'s
//! `RingCompletionSink`) writes into the mmap'd CQ ring and signals via
//! an eventfd; this trait exists so the polled harvester and the
//! callback-driven path (§4.5) share one publishing primitive.

use crate::entry::Cqe;
use crate::error::Result;

pub trait CompletionSink: Send + Sync {
    /// Write a single completion. May be buffered until `flush_and_notify`.
    fn push(&self, user_data: u64, res: i64, flags: u32) -> Result<()>;

    /// Write a batch of completions. Default: calls `push` in a loop.
    fn push_batch(&self, entries: &[Cqe]) -> Result<usize> {
        let mut count = 0;
        for entry in entries {
            self.push(entry.user_data, entry.res as i64, entry.flags)?;
            count += 1;
        }
        Ok(count)
    }

    /// Publish the CQ tail for any buffered completions and wake
    /// waiters. Called once per flush point (submit pipeline end,
    /// polled harvest flush, callback completion), never per completion.
    fn flush_and_notify(&self) -> Result<()>;
}
