use starbug_core::{NodeId, TaskInfo};
use std::fmt;

/// One placement or eviction produced by a session
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Bind a pending task to a node
    Bind { task: TaskInfo, node: NodeId },
    /// Evict a placed task; `task` is the copy as it was before the session touched it
    Evict { task: TaskInfo, reason: String },
}

impl Decision {
    pub fn task(&self) -> &TaskInfo {
        match self {
            Decision::Bind { task, .. } | Decision::Evict { task, .. } => task,
        }
    }

    pub fn is_bind(&self) -> bool {
        matches!(self, Decision::Bind { .. })
    }

    pub fn is_evict(&self) -> bool {
        matches!(self, Decision::Evict { .. })
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Bind { task, node } => write!(f, "bind {} to {}", task.uid, node),
            Decision::Evict { task, .. } => match &task.node_name {
                Some(node) => write!(f, "evict {} from {}", task.uid, node),
                None => write!(f, "evict {}", task.uid),
            },
        }
    }
}

/// Decisions that must be committed together
///
/// A group is what one committed statement produced: a gang's binds,
/// or a preemptor's binds with the evictions that made room for them.
/// Evictions always precede binds.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecisionGroup {
    pub action: String,
    pub decisions: Vec<Decision>,
}

impl DecisionGroup {
    pub fn new(action: impl Into<String>, mut decisions: Vec<Decision>) -> Self {
        // Stable: keeps the relative order inside each kind
        decisions.sort_by_key(|d| d.is_bind());
        Self {
            action: action.into(),
            decisions,
        }
    }

    pub fn binds(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.is_bind())
    }

    pub fn evictions(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter().filter(|d| d.is_evict())
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }
}
