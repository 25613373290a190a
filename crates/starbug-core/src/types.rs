use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

identifier!(
    /// Identity of a schedulable task
    TaskId
);
identifier!(
    /// Identity of a gang-scheduled job (`namespace/name`)
    JobId
);
identifier!(
    /// Identity of a compute node
    NodeId
);
identifier!(
    /// Identity of a queue
    QueueId
);

/// Task lifecycle status as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    /// Waiting for a node
    #[default]
    Pending,
    /// Placed speculatively inside a session, not yet submitted
    Allocated,
    /// Bind submitted, waiting for the provider to confirm
    Binding,
    /// Bound to a node
    Bound,
    /// Running on its node
    Running,
    /// Chosen as a victim inside a session, not yet submitted
    Releasing,
    /// Finished successfully
    Succeeded,
    /// Finished unsuccessfully
    Failed,
}

impl TaskStatus {
    /// Status holds resources on its node
    ///
    /// A `Releasing` task has already given its resources back inside the
    /// session that chose it as a victim.
    pub fn is_occupying(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated | TaskStatus::Binding | TaskStatus::Bound | TaskStatus::Running
        )
    }

    /// Status counts towards the gang threshold
    pub fn is_ready(self) -> bool {
        matches!(
            self,
            TaskStatus::Allocated
                | TaskStatus::Binding
                | TaskStatus::Bound
                | TaskStatus::Running
                | TaskStatus::Succeeded
        )
    }

    /// Status is eligible as a preemption, reclaim or shuffle candidate
    pub fn is_evictable(self) -> bool {
        matches!(self, TaskStatus::Bound | TaskStatus::Running)
    }

    /// Status is terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Allocated => "Allocated",
            TaskStatus::Binding => "Binding",
            TaskStatus::Bound => "Bound",
            TaskStatus::Running => "Running",
            TaskStatus::Releasing => "Releasing",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// Job (pod group) phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JobPhase {
    /// Submitted, not yet admitted into its queue
    #[default]
    Pending,
    /// Admitted by enqueue, eligible for allocation
    Inqueue,
    /// Gang threshold met
    Running,
    /// Every task finished
    Completed,
}

impl JobPhase {
    /// Phase is eligible for allocation
    pub fn is_admitted(self) -> bool {
        matches!(self, JobPhase::Inqueue | JobPhase::Running)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobPhase::Pending => "Pending",
            JobPhase::Inqueue => "Inqueue",
            JobPhase::Running => "Running",
            JobPhase::Completed => "Completed",
        };
        write!(f, "{}", s)
    }
}

/// Queue state, owned by the external queue controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum QueueState {
    #[default]
    Open,
    Closed,
    Unknown,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueState::Open => "Open",
            QueueState::Closed => "Closed",
            QueueState::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_identifier_lookup_by_str() {
        let mut map = BTreeMap::new();
        map.insert(NodeId::from("node-1"), 1);
        assert_eq!(map.get("node-1"), Some(&1));
        assert_eq!(NodeId::new("node-1").to_string(), "node-1");
    }

    #[test]
    fn test_identifier_serde_transparent() {
        let id = JobId::from("default/train");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"default/train\"");
    }

    #[test]
    fn test_task_status_classes() {
        assert!(TaskStatus::Allocated.is_occupying());
        assert!(!TaskStatus::Releasing.is_occupying());
        assert!(!TaskStatus::Releasing.is_ready());
        assert!(TaskStatus::Succeeded.is_ready());
        assert!(!TaskStatus::Succeeded.is_occupying());
        assert!(TaskStatus::Running.is_evictable());
        assert!(!TaskStatus::Binding.is_evictable());
    }

    #[test]
    fn test_job_phase_admitted() {
        assert!(!JobPhase::Pending.is_admitted());
        assert!(JobPhase::Inqueue.is_admitted());
        assert!(JobPhase::Running.is_admitted());
    }
}
