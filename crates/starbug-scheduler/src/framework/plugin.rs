use crate::framework::Session;
use starbug_core::{JobInfo, NodeId, NodeInfo, QueueId, TaskInfo};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Orders two jobs; `Less` runs first
pub type JobOrderFn = Arc<dyn Fn(&Session, &JobInfo, &JobInfo) -> Ordering + Send + Sync>;
/// Orders two queues; `Less` is served first
pub type QueueOrderFn = Arc<dyn Fn(&Session, &QueueId, &QueueId) -> Ordering + Send + Sync>;
/// Orders two tasks of one job; `Less` is placed first
pub type TaskOrderFn = Arc<dyn Fn(&TaskInfo, &TaskInfo) -> Ordering + Send + Sync>;
/// Admits or rejects a node for a task
pub type PredicateFn = Arc<dyn Fn(&Session, &TaskInfo, &NodeInfo) -> FilterResult + Send + Sync>;
/// Scores a feasible node for a task; higher wins
pub type NodeOrderFn = Arc<dyn Fn(&Session, &TaskInfo, &NodeInfo) -> f64 + Send + Sync>;
/// Whether a job's placements may be committed
pub type JobReadyFn = Arc<dyn Fn(&Session, &JobInfo) -> bool + Send + Sync>;
/// Why a job cannot be scheduled at all this cycle, if it cannot
pub type JobValidFn = Arc<dyn Fn(&Session, &JobInfo) -> Option<String> + Send + Sync>;
/// Whether a queue can absorb one more task
pub type QueueAllocatableFn = Arc<dyn Fn(&Session, &QueueId, &TaskInfo) -> bool + Send + Sync>;
/// Whether a pending job may be admitted into its queue
pub type JobEnqueueableFn = Arc<dyn Fn(&Session, &JobInfo) -> bool + Send + Sync>;
/// Subset of candidate victims a plugin allows evicting for a preemptor
pub type VictimFn = Arc<dyn Fn(&Session, &TaskInfo, &[TaskInfo]) -> Vec<TaskInfo> + Send + Sync>;
/// Adjusts session state before attributes are derived
pub type SessionOpenFn = Arc<dyn Fn(&mut Session) + Send + Sync>;

/// Result of evaluating a predicate for a node
#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    /// Node name
    pub node_name: NodeId,
    /// Whether the node passed
    pub passed: bool,
    /// Reason for failure (if any)
    pub reason: Option<String>,
    /// Failure that evicting tasks cannot fix
    pub unresolvable: bool,
}

impl FilterResult {
    /// Create a passing result
    pub fn pass(node_name: NodeId) -> Self {
        Self {
            node_name,
            passed: true,
            reason: None,
            unresolvable: false,
        }
    }

    /// Create a failing result that freeing resources could fix
    pub fn fail(node_name: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason.into()),
            unresolvable: false,
        }
    }

    /// Create a failing result that no eviction can fix
    pub fn unresolvable(node_name: NodeId, reason: impl Into<String>) -> Self {
        Self {
            node_name,
            passed: false,
            reason: Some(reason.into()),
            unresolvable: true,
        }
    }

    /// Passed, or failed only for reasons eviction could fix
    pub fn is_resolvable(&self) -> bool {
        self.passed || !self.unresolvable
    }
}

/// The capabilities one configured plugin contributes
///
/// A plugin is nothing but this set of functions; the framework never
/// sees a concrete plugin type.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    pub name: String,
    pub job_order: Option<JobOrderFn>,
    pub queue_order: Option<QueueOrderFn>,
    pub task_order: Option<TaskOrderFn>,
    pub predicate: Option<PredicateFn>,
    pub node_order: Option<NodeOrderFn>,
    pub job_ready: Option<JobReadyFn>,
    pub job_valid: Option<JobValidFn>,
    pub queue_allocatable: Option<QueueAllocatableFn>,
    pub job_enqueueable: Option<JobEnqueueableFn>,
    pub preemptable: Option<VictimFn>,
    pub reclaimable: Option<VictimFn>,
    pub on_session_open: Option<SessionOpenFn>,
}

impl CapabilitySet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_job_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &JobInfo, &JobInfo) -> Ordering + Send + Sync + 'static,
    {
        self.job_order = Some(Arc::new(f));
        self
    }

    pub fn with_queue_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &QueueId, &QueueId) -> Ordering + Send + Sync + 'static,
    {
        self.queue_order = Some(Arc::new(f));
        self
    }

    pub fn with_task_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskInfo, &TaskInfo) -> Ordering + Send + Sync + 'static,
    {
        self.task_order = Some(Arc::new(f));
        self
    }

    pub fn with_predicate<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &TaskInfo, &NodeInfo) -> FilterResult + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(f));
        self
    }

    pub fn with_node_order<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &TaskInfo, &NodeInfo) -> f64 + Send + Sync + 'static,
    {
        self.node_order = Some(Arc::new(f));
        self
    }

    pub fn with_job_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &JobInfo) -> bool + Send + Sync + 'static,
    {
        self.job_ready = Some(Arc::new(f));
        self
    }

    pub fn with_job_valid<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &JobInfo) -> Option<String> + Send + Sync + 'static,
    {
        self.job_valid = Some(Arc::new(f));
        self
    }

    pub fn with_queue_allocatable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &QueueId, &TaskInfo) -> bool + Send + Sync + 'static,
    {
        self.queue_allocatable = Some(Arc::new(f));
        self
    }

    pub fn with_job_enqueueable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &JobInfo) -> bool + Send + Sync + 'static,
    {
        self.job_enqueueable = Some(Arc::new(f));
        self
    }

    pub fn with_preemptable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &TaskInfo, &[TaskInfo]) -> Vec<TaskInfo> + Send + Sync + 'static,
    {
        self.preemptable = Some(Arc::new(f));
        self
    }

    pub fn with_reclaimable<F>(mut self, f: F) -> Self
    where
        F: Fn(&Session, &TaskInfo, &[TaskInfo]) -> Vec<TaskInfo> + Send + Sync + 'static,
    {
        self.reclaimable = Some(Arc::new(f));
        self
    }

    pub fn with_session_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Session) + Send + Sync + 'static,
    {
        self.on_session_open = Some(Arc::new(f));
        self
    }

    fn capabilities(&self) -> Vec<&'static str> {
        let flags = [
            ("jobOrder", self.job_order.is_some()),
            ("queueOrder", self.queue_order.is_some()),
            ("taskOrder", self.task_order.is_some()),
            ("predicate", self.predicate.is_some()),
            ("nodeOrder", self.node_order.is_some()),
            ("jobReady", self.job_ready.is_some()),
            ("jobValid", self.job_valid.is_some()),
            ("queueAllocatable", self.queue_allocatable.is_some()),
            ("jobEnqueueable", self.job_enqueueable.is_some()),
            ("preemptable", self.preemptable.is_some()),
            ("reclaimable", self.reclaimable.is_some()),
            ("onSessionOpen", self.on_session_open.is_some()),
        ];
        flags
            .into_iter()
            .filter(|(_, set)| *set)
            .map(|(name, _)| name)
            .collect()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// Plugins whose results are combined before the next tier is consulted
#[derive(Debug, Clone, Default)]
pub struct Tier {
    pub plugins: Vec<CapabilitySet>,
}

impl Tier {
    pub fn new(plugins: Vec<CapabilitySet>) -> Self {
        Self { plugins }
    }
}
