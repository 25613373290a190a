use crate::resources::Resource;
use crate::types::{JobId, NodeId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Toleration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One schedulable unit, owned by its job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub uid: TaskId,
    /// Defaults to the uid when empty
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub job: JobId,
    #[serde(default)]
    pub resreq: Resource,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub node_name: Option<NodeId>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub priority_class: Option<String>,
    #[serde(default = "default_true")]
    pub preemptable: bool,
    #[serde(default)]
    pub backfillable: bool,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_version: u64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl TaskInfo {
    /// Create a pending task with the given request
    pub fn new(uid: impl Into<TaskId>, job: impl Into<JobId>, resreq: Resource) -> Self {
        let uid = uid.into();
        Self {
            name: uid.to_string(),
            uid,
            namespace: default_namespace(),
            job: job.into(),
            resreq,
            status: TaskStatus::Pending,
            node_name: None,
            priority: 0,
            priority_class: None,
            preemptable: true,
            backfillable: false,
            node_selector: BTreeMap::new(),
            tolerations: Vec::new(),
            creation_timestamp: Utc::now(),
            resource_version: 0,
        }
    }

    /// Builder: set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: mark the task as already placed on a node
    pub fn placed(mut self, node: impl Into<NodeId>, status: TaskStatus) -> Self {
        self.node_name = Some(node.into());
        self.status = status;
        self
    }

    /// Builder: mark as best-effort backfill work
    pub fn backfill(mut self) -> Self {
        self.backfillable = true;
        self
    }

    /// Builder: set creation time
    pub fn created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = ts;
        self
    }

    /// Whether the task holds resources on a node
    pub fn is_placed(&self) -> bool {
        self.node_name.is_some() && self.status.is_occupying()
    }
}
