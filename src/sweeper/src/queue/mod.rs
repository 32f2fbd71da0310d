//! Deletion queue processing.
//!
//! The queue is one persisted, ordered record. A drain takes the queue lock,
//! resolves items from the head until the batch size or time budget is used
//! up, writes the remainder back and re-arms the scheduler if work is left.

mod lock;
mod processor;

pub use lock::QueueLock;
pub use processor::{DrainOutcome, DrainReport, QueueProcessor, RunNowReport};
