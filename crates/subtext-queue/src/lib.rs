//! The extraction job queue.
//!
//! A durable FIFO over the shared tier's list primitive, with job record
//! snapshots under stable keys and authoritative rows in the durable store.
//! Strict FIFO across all workers in aggregate; per-fingerprint exclusivity
//! comes from the coordinator's single-flight lock, not from the queue.

pub mod error;
pub mod queue;
pub mod reaper;
pub mod store;
#[doc(hidden)]
pub mod testing;

pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueConfig, QueueStats};
pub use reaper::{LeaseReaper, ReaperConfig};
pub use store::{JobCounts, JobStore};
