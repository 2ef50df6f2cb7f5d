//! Scheduler errors

use thiserror::Error;

use crate::runtime::dag::DAGError;

/// Scheduler result
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler errors
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The tracked body returned an error or panicked.
    #[error("Operation failed: {0}")]
    OperationFailed(#[source] anyhow::Error),

    /// The affinity context was torn down while work was pending.
    #[error("Scheduler has been shut down")]
    SchedulerShutDown,

    /// The join target belongs to a different scheduler instance.
    #[error("Cannot join a node owned by scheduler {target} from scheduler {current}")]
    InvalidJoinTarget {
        /// Scheduler performing the join
        current: u64,
        /// Scheduler that owns the target node
        target: u64,
    },

    /// No task of this scheduler is running on the current thread.
    #[error("No ambient task of this scheduler on the current thread")]
    NoAmbientTask,

    /// The task was discarded before it produced a result.
    #[error("Task was dropped before completing")]
    TaskDropped,

    #[error("Graph error: {0}")]
    Graph(#[from] DAGError),
}

impl SchedulerError {
    /// Wrap a panic payload caught while polling a tracked body.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        SchedulerError::OperationFailed(anyhow::anyhow!("operation panicked: {}", message))
    }

    /// Whether this is a failure of the tracked body itself.
    #[inline]
    pub fn is_operation_failure(&self) -> bool {
        matches!(self, SchedulerError::OperationFailed(_))
    }
}
