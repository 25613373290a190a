use crate::decision::Decision;
use crate::error::{Result, SchedulerError};
use starbug_core::{
    JobId, JobInfo, NodeId, NodeInfo, QueueId, QueueInfo, Resource, TaskInfo, TaskStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Point-in-time view of the cluster
///
/// Entities are shared `Arc`s, so cloning a snapshot copies pointers
/// only. Writers go through `Arc::make_mut`, which leaves every
/// snapshot handed out earlier untouched.
#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    pub nodes: BTreeMap<NodeId, Arc<NodeInfo>>,
    pub jobs: BTreeMap<JobId, Arc<JobInfo>>,
    pub queues: BTreeMap<QueueId, Arc<QueueInfo>>,
}

impl ClusterSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a node
    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.nodes.insert(node.name.clone(), Arc::new(node));
        self
    }

    /// Builder: add a queue
    pub fn with_queue(mut self, queue: QueueInfo) -> Self {
        self.queues.insert(queue.name.clone(), Arc::new(queue));
        self
    }

    /// Builder: add a job
    pub fn with_job(mut self, job: JobInfo) -> Self {
        self.jobs.insert(job.uid.clone(), Arc::new(job));
        self
    }

    /// Builder: add a task to its job, and to its node when placed
    pub fn with_task(mut self, task: TaskInfo) -> Result<Self> {
        self.add_task(task)?;
        Ok(self)
    }

    /// Add a task to its job, and to its node when placed
    ///
    /// Placement is checked: a task that does not fit is an error.
    pub fn add_task(&mut self, task: TaskInfo) -> Result<()> {
        if task.is_placed() {
            let node_name = task
                .node_name
                .clone()
                .ok_or_else(|| SchedulerError::internal_error("placed task without node"))?;
            let node = self
                .nodes
                .get_mut(&node_name)
                .ok_or_else(|| SchedulerError::unknown_entity("Node", node_name.as_str()))?;
            Arc::make_mut(node).add_task(&task)?;
        }
        let job = self
            .jobs
            .get_mut(&task.job)
            .ok_or_else(|| SchedulerError::unknown_entity("Job", task.job.as_str()))?;
        Arc::make_mut(job).upsert_task(task)?;
        Ok(())
    }

    /// Sum of allocatable over all nodes
    pub fn total_allocatable(&self) -> Resource {
        let mut total = Resource::new();
        for node in self.nodes.values() {
            total.add(&node.allocatable);
        }
        total
    }

    pub fn task(&self, job: &JobId, task: &str) -> Option<&TaskInfo> {
        self.jobs.get(job).and_then(|j| j.task(task))
    }

    /// Apply one decision, validating it against the current state
    ///
    /// A bind needs a pending, unbound task and room on the node; an
    /// eviction needs the task to still be placed where the session saw
    /// it. On error nothing is modified.
    pub(crate) fn try_apply(&mut self, decision: &Decision) -> Result<()> {
        match decision {
            Decision::Bind { task, node } => {
                let current = self.current_task(task)?;
                if current.status != TaskStatus::Pending || current.node_name.is_some() {
                    return Err(SchedulerError::invariant_violation(
                        format!("task {}", task.uid),
                        format!("cannot bind a task in status {}", current.status),
                    ));
                }
                let mut placed = current;
                placed.status = TaskStatus::Binding;
                placed.node_name = Some(node.clone());

                let info = self
                    .nodes
                    .get_mut(node)
                    .ok_or_else(|| SchedulerError::unknown_entity("Node", node.as_str()))?;
                Arc::make_mut(info).add_task(&placed).map_err(|e| {
                    SchedulerError::invariant_violation(
                        format!("task {}", task.uid),
                        format!("would over-commit node {}: {}", node, e),
                    )
                })?;
                self.store_task(placed)
            }
            Decision::Evict { task, .. } => {
                let current = self.current_task(task)?;
                if !current.is_placed() || current.node_name != task.node_name {
                    return Err(SchedulerError::invariant_violation(
                        format!("task {}", task.uid),
                        "task is no longer placed where it was chosen as a victim",
                    ));
                }
                let node = current
                    .node_name
                    .clone()
                    .ok_or_else(|| SchedulerError::internal_error("placed task without node"))?;
                if let Some(info) = self.nodes.get_mut(&node) {
                    Arc::make_mut(info).remove_task(task.uid.as_str())?;
                }
                let mut released = current;
                released.status = TaskStatus::Pending;
                released.node_name = None;
                self.store_task(released)
            }
        }
    }

    /// Undo an assumed decision after the provider refused it
    ///
    /// Only undoes what is still the assumed state; anything the provider
    /// has reported since wins.
    pub(crate) fn revert(&mut self, decision: &Decision) -> Result<bool> {
        match decision {
            Decision::Bind { task, node } => {
                let current = self.current_task(task)?;
                if current.status != TaskStatus::Binding || current.node_name.as_ref() != Some(node)
                {
                    return Ok(false);
                }
                if let Some(info) = self.nodes.get_mut(node) {
                    Arc::make_mut(info).remove_task(task.uid.as_str())?;
                }
                let mut pending = current;
                pending.status = TaskStatus::Pending;
                pending.node_name = None;
                self.store_task(pending)?;
                Ok(true)
            }
            Decision::Evict { task, .. } => {
                let current = self.current_task(task)?;
                if current.status != TaskStatus::Pending || current.node_name.is_some() {
                    return Ok(false);
                }
                if let Some(node) = &task.node_name {
                    if let Some(info) = self.nodes.get_mut(node) {
                        Arc::make_mut(info).record_task(task);
                    }
                }
                self.store_task(task.clone())?;
                Ok(true)
            }
        }
    }

    fn current_task(&self, task: &TaskInfo) -> Result<TaskInfo> {
        self.task(&task.job, task.uid.as_str())
            .cloned()
            .ok_or_else(|| SchedulerError::unknown_entity("Task", task.uid.as_str()))
    }

    fn store_task(&mut self, task: TaskInfo) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&task.job)
            .ok_or_else(|| SchedulerError::unknown_entity("Job", task.job.as_str()))?;
        Arc::make_mut(job).upsert_task(task)?;
        Ok(())
    }
}
