//! # ring-backend — default ring implementations
//!
//! Every trait boundary defined in `ring-core` gets exactly one default
//! implementation here. Each impl prioritizes correctness and
//! simplicity over peak throughput; optimized impls belong behind
//! feature flags or in separate crates, not by modifying these.
//!
//! ## Default stack
//!
//! | Trait          | Default impl         |
//! |----------------|-----------------------|
//! | FileObject     | `StdFile`             |
//! | WorkerPool     | `OffloadWorkerPool`   |
//! | CompletionSink | `RingCompletionSink`  |
//! | Notifier       | `EventFdNotifier`     |

pub mod completion_sink;
pub mod cq_ring;
pub mod cq_wait;
pub mod dispatch;
pub mod eventfd_notifier;
pub mod offload_worker;
pub mod poll_list;
pub mod refcount;
pub mod request_pool;
pub mod ring_context;
pub mod sq_ring;
pub mod std_file;
pub mod submit_state;
