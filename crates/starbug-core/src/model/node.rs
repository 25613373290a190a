use crate::error::{CoreError, Result};
use crate::model::TaskInfo;
use crate::resources::{share, Resource};
use crate::types::{NodeId, TaskId};
use k8s_openapi::api::core::v1::Taint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A compute node and the tasks placed on it
///
/// `used` is the sum of requests of the tasks on the node. Watch
/// events carry only the node's own attributes; the task set is
/// maintained by the cache and never serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: NodeId,
    pub allocatable: Resource,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub taints: Vec<Taint>,
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default = "default_ready")]
    pub ready: bool,
    #[serde(default)]
    pub resource_version: u64,
    #[serde(skip)]
    used: Resource,
    #[serde(skip)]
    tasks: BTreeMap<TaskId, TaskInfo>,
}

fn default_ready() -> bool {
    true
}

impl NodeInfo {
    pub fn new(name: impl Into<NodeId>, allocatable: Resource) -> Self {
        Self {
            name: name.into(),
            allocatable,
            labels: BTreeMap::new(),
            taints: Vec::new(),
            unschedulable: false,
            ready: true,
            resource_version: 0,
            used: Resource::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// Builder: add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Builder: add a taint
    pub fn with_taint(mut self, taint: Taint) -> Self {
        self.taints.push(taint);
        self
    }

    pub fn used(&self) -> &Resource {
        &self.used
    }

    /// Capacity not held by any task on the node
    pub fn idle(&self) -> Resource {
        self.allocatable.saturating_sub(&self.used)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskInfo> {
        self.tasks.values()
    }

    pub fn task(&self, id: &str) -> Option<&TaskInfo> {
        self.tasks.get(id)
    }

    pub fn has_task(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Place a task, refusing to exceed capacity on any dimension
    pub fn add_task(&mut self, task: &TaskInfo) -> Result<()> {
        if self.tasks.contains_key(task.uid.as_str()) {
            return Err(CoreError::task_exists(task.uid.as_str(), self.name.as_str()));
        }
        let mut used = self.used.clone();
        used.add(&task.resreq);
        if !used.less_equal(&self.allocatable) {
            let idle = self.idle();
            let dimension = task
                .resreq
                .insufficient_dimensions(&idle)
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(CoreError::insufficient_resource(
                dimension.clone(),
                task.resreq.get(&dimension),
                idle.get(&dimension),
            ));
        }
        self.used = used;
        self.tasks.insert(task.uid.clone(), task.clone());
        Ok(())
    }

    /// Record a task reported by the provider, even if it over-commits the node
    ///
    /// Returns true when the node is over-committed afterwards.
    pub fn record_task(&mut self, task: &TaskInfo) -> bool {
        if let Some(old) = self.tasks.remove(task.uid.as_str()) {
            self.used = self.used.saturating_sub(&old.resreq);
        }
        self.used.add(&task.resreq);
        self.tasks.insert(task.uid.clone(), task.clone());
        self.is_overcommitted()
    }

    /// Remove a task and return its resources to idle
    pub fn remove_task(&mut self, id: &str) -> Result<TaskInfo> {
        let resreq = self
            .tasks
            .get(id)
            .map(|t| t.resreq.clone())
            .ok_or_else(|| CoreError::task_not_found(id, self.name.as_str()))?;
        self.used = self.used.checked_sub(&resreq)?;
        self.tasks
            .remove(id)
            .ok_or_else(|| CoreError::task_not_found(id, self.name.as_str()))
    }

    /// Replace the stored copy of a task without changing accounting
    pub fn update_task(&mut self, task: &TaskInfo) -> Result<()> {
        let stored = self
            .tasks
            .get_mut(task.uid.as_str())
            .ok_or_else(|| CoreError::task_not_found(task.uid.as_str(), self.name.as_str()))?;
        *stored = task.clone();
        Ok(())
    }

    /// Largest used/allocatable ratio over the node's dimensions
    pub fn utilization(&self) -> f64 {
        self.allocatable
            .names()
            .map(|name| share(self.used.get(name), self.allocatable.get(name)))
            .fold(0.0, f64::max)
    }

    pub fn is_overcommitted(&self) -> bool {
        !self.used.less_equal(&self.allocatable)
    }

    /// Copy attributes from a newer spec, keeping placed tasks
    pub fn update_spec(&mut self, spec: &NodeInfo) {
        self.allocatable = spec.allocatable.clone();
        self.labels = spec.labels.clone();
        self.taints = spec.taints.clone();
        self.unschedulable = spec.unschedulable;
        self.ready = spec.ready;
        self.resource_version = spec.resource_version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;

    fn task(id: &str, cpu: i64) -> TaskInfo {
        TaskInfo::new(id, "default/job", Resource::cpu(cpu)).placed("n1", TaskStatus::Bound)
    }

    #[test]
    fn test_add_and_remove_task() {
        let mut node = NodeInfo::new("n1", Resource::cpu(4));
        node.add_task(&task("a", 3)).unwrap();
        assert_eq!(node.idle(), Resource::cpu(1));
        assert!((node.utilization() - 0.75).abs() < f64::EPSILON);

        let err = node.add_task(&task("b", 2)).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientResource { .. }));
        assert_eq!(node.used(), &Resource::cpu(3));

        assert!(matches!(
            node.add_task(&task("a", 1)),
            Err(CoreError::TaskExists { .. })
        ));

        node.remove_task("a").unwrap();
        assert!(node.used().is_empty());
        assert!(node.remove_task("a").is_err());
    }

    #[test]
    fn test_record_task_allows_overcommit() {
        let mut node = NodeInfo::new("n1", Resource::cpu(2));
        assert!(!node.record_task(&task("a", 2)));
        assert!(node.record_task(&task("b", 1)));
        assert!(node.idle().is_empty());

        // Re-recording replaces rather than double counts
        node.record_task(&task("b", 1));
        assert_eq!(node.used(), &Resource::cpu(3));
    }
}
