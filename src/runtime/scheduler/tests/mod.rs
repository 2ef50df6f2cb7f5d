//! Scheduler unit tests
//!
//! Configuration, task state encoding and single-scheduler behavior of the
//! run, switch, join and adapter entry points.

use crate::runtime::scheduler::{NodeRef, SchedulerConfig, TaskId, TaskState};


#[cfg(test)]
mod task_id_tests {
    use super::*;

    #[test]
    fn test_task_id_partial_eq() {
        assert_eq!(TaskId(1), TaskId(1));
        assert_ne!(TaskId(1), TaskId(2));
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(5).to_string(), "Task(5)");
        assert_eq!(TaskId(5).inner(), 5);
    }
}

#[cfg(test)]
mod task_state_tests {
    use super::*;

    #[test]
    fn test_task_state_u8_encoding() {
        for state in [
            TaskState::Idle,
            TaskState::Scheduled,
            TaskState::Running,
            TaskState::Notified,
            TaskState::Finished,
        ] {
            assert_eq!(TaskState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_task_state_unknown_is_finished() {
        assert_eq!(TaskState::from_u8(200), TaskState::Finished);
    }
}

#[cfg(test)]
mod scheduler_config_tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert!(config.worker_threads >= 4);
        assert_eq!(config.worker_name_prefix, "affinity-worker");
        assert_eq!(config.pump_idle_timeout, Duration::from_millis(100));
    }

    #[test]
    fn test_scheduler_config_serializes_timeout_as_millis() {
        let config = SchedulerConfig {
            worker_threads: 2,
            worker_name_prefix: "w".to_string(),
            pump_idle_timeout: Duration::from_millis(42),
        };
        let text = ron::to_string(&config).unwrap();
        assert!(text.contains("42"));
    }
}

#[cfg(test)]
mod node_ref_tests {
    use super::*;
    use crate::runtime::dag::NodeId;

    #[test]
    fn test_node_ref_accessors() {
        let node = NodeRef::new(3, NodeId(7));
        assert_eq!(node.id(), NodeId(7));
        assert_eq!(node.scheduler_id(), 3);
        assert_eq!(node.to_string(), "NodeId(7)@3");
    }
}

/// A scheduler for the current thread with a small pool and a short idle wait.
pub(super) fn test_scheduler() -> crate::runtime::scheduler::Scheduler {
    crate::runtime::scheduler::Scheduler::with_config(SchedulerConfig {
        worker_threads: 4,
        worker_name_prefix: "test-worker".to_string(),
        pump_idle_timeout: std::time::Duration::from_millis(10),
    })
}
