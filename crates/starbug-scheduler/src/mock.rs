use crate::error::{Result, SchedulerError};
use crate::provider::{ClusterStateProvider, JobStatus};
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use starbug_core::{
    ClusterEvent, ClusterObject, JobId, JobInfo, NodeId, NodeInfo, QueueId, QueueInfo, TaskId,
    TaskInfo, TaskStatus, WatchEvent,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

/// Configuration for the in-memory provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Capacity of the broadcast channel feeding watchers
    pub capacity: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// A call the scheduler made against the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Bind { task: TaskId, node: NodeId },
    Evict { task: TaskId },
    UpdateJobStatus { job: JobId },
}

#[derive(Debug, Default)]
struct ClusterState {
    nodes: BTreeMap<NodeId, NodeInfo>,
    queues: BTreeMap<QueueId, QueueInfo>,
    jobs: BTreeMap<JobId, JobInfo>,
    tasks: BTreeMap<TaskId, TaskInfo>,
    version: u64,
}

impl ClusterState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn listing(&self) -> Vec<WatchEvent> {
        let queues = self.queues.values().cloned().map(ClusterObject::Queue);
        let nodes = self.nodes.values().cloned().map(ClusterObject::Node);
        let jobs = self.jobs.values().cloned().map(ClusterObject::Job);
        let tasks = self.tasks.values().cloned().map(ClusterObject::Task);
        queues
            .chain(nodes)
            .chain(jobs)
            .chain(tasks)
            .map(|object| WatchEvent::Changed(ClusterEvent::added(object)))
            .chain(std::iter::once(WatchEvent::Synced))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Faults {
    bind: BTreeSet<TaskId>,
    evict: BTreeSet<TaskId>,
}

/// In-memory cluster-state provider
///
/// Holds nodes, queues, jobs and tasks in memory and fans every change
/// out to watchers. Binds and evictions are acknowledged immediately and
/// echoed back as task updates, the way an API server would. Individual
/// binds or evictions can be made to fail for testing.
pub struct InMemoryProvider {
    state: Arc<RwLock<ClusterState>>,
    faults: Arc<RwLock<Faults>>,
    calls: Arc<RwLock<Vec<ProviderCall>>>,
    events: broadcast::Sender<WatchEvent>,
}

impl InMemoryProvider {
    pub fn new(config: ProviderConfig) -> Self {
        let (events, _) = broadcast::channel(config.capacity);
        Self {
            state: Arc::new(RwLock::new(ClusterState::default())),
            faults: Arc::new(RwLock::new(Faults::default())),
            calls: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Create or replace a node
    pub async fn upsert_node(&self, mut node: NodeInfo) {
        let mut state = self.state.write().await;
        node.resource_version = state.next_version();
        let event = if state.nodes.insert(node.name.clone(), node.clone()).is_some() {
            ClusterEvent::modified(ClusterObject::Node(node))
        } else {
            ClusterEvent::added(ClusterObject::Node(node))
        };
        self.publish(event);
    }

    /// Create or replace a queue
    pub async fn upsert_queue(&self, mut queue: QueueInfo) {
        let mut state = self.state.write().await;
        queue.resource_version = state.next_version();
        let event = if state.queues.insert(queue.name.clone(), queue.clone()).is_some() {
            ClusterEvent::modified(ClusterObject::Queue(queue))
        } else {
            ClusterEvent::added(ClusterObject::Queue(queue))
        };
        self.publish(event);
    }

    /// Create or replace a job (attributes only; tasks are separate)
    pub async fn upsert_job(&self, mut job: JobInfo) {
        let mut state = self.state.write().await;
        job.resource_version = state.next_version();
        let event = if state.jobs.insert(job.uid.clone(), job.clone()).is_some() {
            ClusterEvent::modified(ClusterObject::Job(job))
        } else {
            ClusterEvent::added(ClusterObject::Job(job))
        };
        self.publish(event);
    }

    /// Create or replace a task
    pub async fn upsert_task(&self, mut task: TaskInfo) {
        let mut state = self.state.write().await;
        task.resource_version = state.next_version();
        let event = if state.tasks.insert(task.uid.clone(), task.clone()).is_some() {
            ClusterEvent::modified(ClusterObject::Task(task))
        } else {
            ClusterEvent::added(ClusterObject::Task(task))
        };
        self.publish(event);
    }

    /// Delete a task
    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let mut task = state
            .tasks
            .remove(id)
            .ok_or_else(|| SchedulerError::unknown_entity("Task", id))?;
        task.resource_version = state.next_version();
        self.publish(ClusterEvent::deleted(ClusterObject::Task(task)));
        Ok(())
    }

    /// Delete a node
    pub async fn delete_node(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let mut node = state
            .nodes
            .remove(name)
            .ok_or_else(|| SchedulerError::unknown_entity("Node", name))?;
        node.resource_version = state.next_version();
        self.publish(ClusterEvent::deleted(ClusterObject::Node(node)));
        Ok(())
    }

    /// Make every future bind of this task fail
    pub async fn fail_bind(&self, task: impl Into<TaskId>) {
        self.faults.write().await.bind.insert(task.into());
    }

    /// Make every future eviction of this task fail
    pub async fn fail_evict(&self, task: impl Into<TaskId>) {
        self.faults.write().await.evict.insert(task.into());
    }

    pub async fn task(&self, id: &str) -> Option<TaskInfo> {
        self.state.read().await.tasks.get(id).cloned()
    }

    pub async fn job(&self, id: &str) -> Option<JobInfo> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Tasks currently bound to a node
    pub async fn tasks_on(&self, node: &str) -> Vec<TaskInfo> {
        self.state
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.node_name.as_ref().is_some_and(|n| n.as_str() == node))
            .cloned()
            .collect()
    }

    /// Calls made so far, in order
    pub async fn calls(&self) -> Vec<ProviderCall> {
        self.calls.read().await.clone()
    }

    fn publish(&self, event: ClusterEvent) {
        // No receivers is fine: nobody is watching yet
        let _ = self.events.send(WatchEvent::Changed(event));
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(ProviderConfig::default())
    }
}

#[async_trait]
impl ClusterStateProvider for InMemoryProvider {
    async fn watch(&self) -> Result<BoxStream<'static, WatchEvent>> {
        // Subscribe under the read lock so no change falls between the
        // listing and the live stream
        let state = self.state.read().await;
        let rx = self.events.subscribe();
        let listing = state.listing();
        drop(state);

        // A lagged watcher has missed changes, so its stream ends there
        let live = BroadcastStream::new(rx)
            .take_while(
                |result: &std::result::Result<WatchEvent, BroadcastStreamRecvError>| {
                    let keep = match result {
                        Ok(_) => true,
                        Err(BroadcastStreamRecvError::Lagged(n)) => {
                            warn!("Watcher lagged behind by {} events, ending watch", n);
                            false
                        }
                    };
                    future::ready(keep)
                },
            )
            .filter_map(|result| future::ready(result.ok()));

        Ok(stream::iter(listing).chain(live).boxed())
    }

    async fn bind(&self, task: &TaskInfo, node: &NodeId) -> Result<()> {
        self.calls.write().await.push(ProviderCall::Bind {
            task: task.uid.clone(),
            node: node.clone(),
        });
        if self.faults.read().await.bind.contains(&task.uid) {
            return Err(SchedulerError::provider_error(
                format!("bind task {}", task.uid),
                "injected failure",
            ));
        }

        let mut state = self.state.write().await;
        if !state.nodes.contains_key(node) {
            return Err(SchedulerError::provider_error(
                format!("bind task {}", task.uid),
                format!("node {} does not exist", node),
            ));
        }
        let version = state.next_version();
        let stored = state.tasks.get_mut(&task.uid).ok_or_else(|| {
            SchedulerError::provider_error(
                format!("bind task {}", task.uid),
                "task does not exist",
            )
        })?;
        if let Some(bound) = &stored.node_name {
            return Err(SchedulerError::provider_error(
                format!("bind task {}", task.uid),
                format!("task is already bound to {}", bound),
            ));
        }
        stored.node_name = Some(node.clone());
        stored.status = TaskStatus::Bound;
        stored.resource_version = version;
        let updated = stored.clone();
        debug!("Mock: bound task {} to node {}", task.uid, node);
        self.publish(ClusterEvent::modified(ClusterObject::Task(updated)));
        Ok(())
    }

    async fn evict(&self, task: &TaskInfo, reason: &str) -> Result<()> {
        self.calls.write().await.push(ProviderCall::Evict {
            task: task.uid.clone(),
        });
        if self.faults.read().await.evict.contains(&task.uid) {
            return Err(SchedulerError::provider_error(
                format!("evict task {}", task.uid),
                "injected failure",
            ));
        }

        let mut state = self.state.write().await;
        let version = state.next_version();
        let stored = state.tasks.get_mut(&task.uid).ok_or_else(|| {
            SchedulerError::provider_error(
                format!("evict task {}", task.uid),
                "task does not exist",
            )
        })?;
        // The owning controller recreates an evicted task as pending
        stored.node_name = None;
        stored.status = TaskStatus::Pending;
        stored.resource_version = version;
        let updated = stored.clone();
        debug!("Mock: evicted task {} ({})", task.uid, reason);
        self.publish(ClusterEvent::modified(ClusterObject::Task(updated)));
        Ok(())
    }

    async fn update_job_status(&self, job: &JobInfo, status: &JobStatus) -> Result<()> {
        self.calls.write().await.push(ProviderCall::UpdateJobStatus {
            job: job.uid.clone(),
        });

        let mut state = self.state.write().await;
        let version = state.next_version();
        let stored = state
            .jobs
            .get_mut(&job.uid)
            .ok_or_else(|| SchedulerError::unknown_entity("Job", job.uid.as_str()))?;
        stored.phase = status.phase;
        stored.unschedulable_reason = status.unschedulable_reason.clone();
        stored.resource_version = version;
        let updated = stored.clone();
        self.publish(ClusterEvent::modified(ClusterObject::Job(updated)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starbug_core::Resource;
    use std::time::Duration;

    async fn seeded() -> InMemoryProvider {
        let provider = InMemoryProvider::default();
        provider.upsert_queue(QueueInfo::new("default")).await;
        provider
            .upsert_node(NodeInfo::new("node-1", Resource::cpu(4)))
            .await;
        provider
            .upsert_job(JobInfo::new("default/train", "default", 1))
            .await;
        provider
            .upsert_task(TaskInfo::new("t1", "default/train", Resource::cpu(1)))
            .await;
        provider
    }

    #[tokio::test]
    async fn test_watch_lists_then_synced() {
        let provider = seeded().await;
        let mut stream = provider.watch().await.unwrap();

        let mut kinds = Vec::new();
        loop {
            match stream.next().await.unwrap() {
                WatchEvent::Changed(event) => kinds.push(event.object.key().kind),
                WatchEvent::Synced => break,
            }
        }
        assert_eq!(kinds.len(), 4);
        assert_eq!(kinds[0], starbug_core::ObjectKind::Queue);
        assert_eq!(kinds[3], starbug_core::ObjectKind::Task);
    }

    #[tokio::test]
    async fn test_bind_and_evict_echo_updates() {
        let provider = seeded().await;
        let mut stream = provider.watch().await.unwrap();
        while stream.next().await.unwrap() != WatchEvent::Synced {}

        let task = provider.task("t1").await.unwrap();
        provider.bind(&task, &NodeId::from("node-1")).await.unwrap();

        match stream.next().await.unwrap() {
            WatchEvent::Changed(event) => match event.object {
                ClusterObject::Task(t) => {
                    assert_eq!(t.status, TaskStatus::Bound);
                    assert_eq!(t.node_name, Some(NodeId::from("node-1")));
                }
                other => panic!("unexpected object {:?}", other),
            },
            other => panic!("unexpected event {:?}", other),
        }

        // Double bind is refused
        assert!(provider.bind(&task, &NodeId::from("node-1")).await.is_err());

        provider.evict(&task, "test").await.unwrap();
        let evicted = provider.task("t1").await.unwrap();
        assert_eq!(evicted.status, TaskStatus::Pending);
        assert!(evicted.node_name.is_none());
        assert_eq!(provider.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let provider = seeded().await;
        provider.fail_bind("t1").await;
        let task = provider.task("t1").await.unwrap();
        let err = provider.bind(&task, &NodeId::from("node-1")).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ProviderError { .. }));
        assert!(provider.task("t1").await.unwrap().node_name.is_none());

        let missing = provider.bind(&task, &NodeId::from("node-9")).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_lagged_watch_ends() {
        let provider = InMemoryProvider::new(ProviderConfig { capacity: 2 });
        let mut stream = provider.watch().await.unwrap();
        assert_eq!(stream.next().await.unwrap(), WatchEvent::Synced);

        for i in 0..5 {
            provider
                .upsert_node(NodeInfo::new(format!("node-{}", i), Resource::cpu(1)))
                .await;
        }

        // The skipped changes are never papered over
        let next = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(next.is_none());

        // A fresh watch lists everything again
        let mut relisted = provider.watch().await.unwrap();
        let mut nodes = 0;
        while let WatchEvent::Changed(_) = relisted.next().await.unwrap() {
            nodes += 1;
        }
        assert_eq!(nodes, 5);
    }
}
