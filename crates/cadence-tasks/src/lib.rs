//! # cadence-tasks
//!
//! Deduplicating, concurrency-limited task queue.
//!
//! Filesystem scans and file-add ingestion submit work keyed by an
//! identity (usually an absolute path). A second submission for an identity
//! that is already pending or running joins the existing unit of work
//! instead of starting a duplicate, and at most `max_concurrency` units run
//! at once.

mod error;
mod queue;

pub use error::{TaskError, TaskResult};
pub use queue::{
    ClearPolicy, Completion, DedupTaskQueue, Output, Payload, TaskEvent, TaskId, TaskQueueOptions,
    Waiter,
};
