use crate::error::{CoreError, Result};
use crate::model::TaskInfo;
use crate::resources::Resource;
use crate::types::{JobId, JobPhase, NodeId, QueueId, TaskId, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A gang-scheduled job and the tasks it owns
///
/// Watch events carry only the job's own attributes; the task set is
/// maintained by the cache from task events and is never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub uid: JobId,
    /// Defaults to the uid when empty
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub queue: QueueId,
    #[serde(default)]
    pub priority: i32,
    /// Gang threshold: tasks that must be placed together
    #[serde(default = "default_min_available")]
    pub min_available: u32,
    #[serde(default)]
    pub min_resources: Option<Resource>,
    #[serde(default)]
    pub phase: JobPhase,
    /// Last unschedulable reason reported back to the provider
    #[serde(default)]
    pub unschedulable_reason: Option<String>,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(skip)]
    tasks: BTreeMap<TaskId, TaskInfo>,
    #[serde(skip)]
    allocated: Resource,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_min_available() -> u32 {
    1
}

impl JobInfo {
    pub fn new(uid: impl Into<JobId>, queue: impl Into<QueueId>, min_available: u32) -> Self {
        let uid = uid.into();
        let (namespace, name) = match uid.as_str().split_once('/') {
            Some((ns, n)) => (ns.to_string(), n.to_string()),
            None => (default_namespace(), uid.to_string()),
        };
        Self {
            uid,
            name,
            namespace,
            queue: queue.into(),
            priority: 0,
            min_available,
            min_resources: None,
            phase: JobPhase::Pending,
            unschedulable_reason: None,
            creation_timestamp: Utc::now(),
            resource_version: 0,
            tasks: BTreeMap::new(),
            allocated: Resource::new(),
        }
    }

    /// Builder: set priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: set phase
    pub fn with_phase(mut self, phase: JobPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Builder: set creation time
    pub fn created_at(mut self, ts: DateTime<Utc>) -> Self {
        self.creation_timestamp = ts;
        self
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    pub fn task(&self, id: &str) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Insert or replace a task, returning the previous copy
    pub fn upsert_task(&mut self, task: TaskInfo) -> Result<Option<TaskInfo>> {
        if task.job != self.uid {
            return Err(CoreError::invalid_object(
                "Task",
                format!("task {} belongs to job {}, not {}", task.uid, task.job, self.uid),
                "Route the task to its owning job",
            ));
        }
        if task.status.is_occupying() {
            self.allocated.add(&task.resreq);
        }
        let previous = self.tasks.insert(task.uid.clone(), task);
        if let Some(old) = &previous {
            if old.status.is_occupying() {
                self.release(&old.resreq);
            }
        }
        Ok(previous)
    }

    /// Remove a task, returning it
    pub fn remove_task(&mut self, id: &str) -> Option<TaskInfo> {
        let removed = self.tasks.remove(id)?;
        if removed.status.is_occupying() {
            self.release(&removed.resreq);
        }
        Some(removed)
    }

    /// Change a task's status, returning the previous status
    pub fn set_task_status(&mut self, id: &str, status: TaskStatus) -> Result<TaskStatus> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::task_not_found(id, self.uid.as_str()))?;
        let previous = task.status;
        task.status = status;
        let resreq = task.resreq.clone();

        match (previous.is_occupying(), status.is_occupying()) {
            (false, true) => {
                self.allocated.add(&resreq);
            }
            (true, false) => self.release(&resreq),
            _ => {}
        }
        Ok(previous)
    }

    /// Change the node a task is assigned to
    pub fn set_task_node(&mut self, id: &str, node: Option<NodeId>) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| CoreError::task_not_found(id, self.uid.as_str()))?;
        task.node_name = node;
        Ok(())
    }

    /// Sum of requests of tasks holding node resources
    pub fn allocated(&self) -> &Resource {
        &self.allocated
    }

    /// Tasks counting towards the gang threshold
    pub fn ready_task_num(&self) -> u32 {
        self.tasks.values().filter(|t| t.status.is_ready()).count() as u32
    }

    /// Tasks that could still take part in the gang (everything not failed)
    pub fn valid_task_num(&self) -> u32 {
        self.tasks
            .values()
            .filter(|t| t.status != TaskStatus::Failed)
            .count() as u32
    }

    /// Number of tasks in the given status
    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Tasks waiting for a node
    pub fn pending_tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
    }

    /// Gang threshold currently met
    pub fn is_ready(&self) -> bool {
        self.ready_task_num() >= self.min_available
    }

    /// Resources the gang needs to start
    ///
    /// Uses `min_resources` when the submitter declared it; otherwise sums
    /// the `min_available` highest-priority tasks.
    pub fn min_request(&self) -> Resource {
        if let Some(min) = &self.min_resources {
            return min.clone();
        }
        let mut tasks: Vec<&TaskInfo> = self
            .tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.creation_timestamp.cmp(&b.creation_timestamp))
                .then(a.uid.cmp(&b.uid))
        });
        let mut total = Resource::new();
        for task in tasks.into_iter().take(self.min_available as usize) {
            total.add(&task.resreq);
        }
        total
    }

    /// Requests of every non-terminal task
    pub fn total_request(&self) -> Resource {
        let mut total = Resource::new();
        for task in self.tasks.values().filter(|t| !t.status.is_terminal()) {
            total.add(&task.resreq);
        }
        total
    }

    /// Phase implied by the current task statuses
    pub fn derived_phase(&self) -> JobPhase {
        if !self.tasks.is_empty() && self.tasks.values().all(|t| t.status == TaskStatus::Succeeded) {
            return JobPhase::Completed;
        }
        if self.min_available > 0 && self.is_ready() && self.ready_task_num() > 0 {
            return JobPhase::Running;
        }
        if self.phase.is_admitted() {
            JobPhase::Inqueue
        } else {
            self.phase
        }
    }

    /// Copy attributes from a newer spec, keeping the task set
    pub fn update_spec(&mut self, spec: &JobInfo) {
        self.name = spec.name.clone();
        self.namespace = spec.namespace.clone();
        self.queue = spec.queue.clone();
        self.priority = spec.priority;
        self.min_available = spec.min_available;
        self.min_resources = spec.min_resources.clone();
        self.phase = spec.phase;
        self.unschedulable_reason = spec.unschedulable_reason.clone();
        self.creation_timestamp = spec.creation_timestamp;
        self.resource_version = spec.resource_version;
    }

    fn release(&mut self, resreq: &Resource) {
        // Counters are built from the same requests, so this never clamps
        self.allocated = self.allocated.saturating_sub(resreq);
    }
}
