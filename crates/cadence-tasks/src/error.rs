//! Task failure type shared by every waiter of a unit.

use thiserror::Error;

/// Result delivered to task waiters.
pub type TaskResult<O> = std::result::Result<O, TaskError>;

/// Why a unit of work did not produce an output.
///
/// The same outcome is handed to every waiter of a unit, so this type is
/// `Clone` and carries failures as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("removed from queue")]
    RemovedFromQueue,

    #[error("task was dropped without signalling completion")]
    Abandoned,

    #[error("id is not queued")]
    NotQueued,

    #[error("task failed: {0}")]
    Failed(String),
}

impl TaskError {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }
}
