use crate::model::{JobInfo, NodeInfo, QueueInfo, TaskInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
}

/// Kind of entity an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Node,
    Queue,
    Job,
    Task,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Node => "Node",
            ObjectKind::Queue => "Queue",
            ObjectKind::Job => "Job",
            ObjectKind::Task => "Task",
        };
        write!(f, "{}", s)
    }
}

/// Identity of an entity across kinds
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub name: String,
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Entity payload of a watch event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "object")]
pub enum ClusterObject {
    Node(NodeInfo),
    Queue(QueueInfo),
    Job(JobInfo),
    Task(TaskInfo),
}

impl ClusterObject {
    pub fn key(&self) -> ObjectKey {
        let (kind, name) = match self {
            ClusterObject::Node(n) => (ObjectKind::Node, n.name.to_string()),
            ClusterObject::Queue(q) => (ObjectKind::Queue, q.name.to_string()),
            ClusterObject::Job(j) => (ObjectKind::Job, j.uid.to_string()),
            ClusterObject::Task(t) => (ObjectKind::Task, t.uid.to_string()),
        };
        ObjectKey { kind, name }
    }

    pub fn resource_version(&self) -> u64 {
        match self {
            ClusterObject::Node(n) => n.resource_version,
            ClusterObject::Queue(q) => q.resource_version,
            ClusterObject::Job(j) => j.resource_version,
            ClusterObject::Task(t) => t.resource_version,
        }
    }
}

/// A change notification from the cluster-state provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// Type of watch event (ADDED, MODIFIED, DELETED)
    pub event_type: WatchEventType,
    /// The entity as of this event
    pub object: ClusterObject,
}

impl ClusterEvent {
    /// Create an ADDED event
    pub fn added(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Added,
            object,
        }
    }

    /// Create a MODIFIED event
    pub fn modified(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            object,
        }
    }

    /// Create a DELETED event
    pub fn deleted(object: ClusterObject) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            object,
        }
    }
}

/// Item of a provider watch stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatchEvent {
    /// An entity changed
    Changed(ClusterEvent),
    /// The initial listing is complete; the cache may serve snapshots
    Synced,
}
