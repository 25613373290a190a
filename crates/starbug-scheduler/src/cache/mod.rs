//! Cluster state cache
//!
//! A single ingestion task applies provider watch events; sessions take
//! cheap copy-on-write snapshots. Events are applied idempotently: a
//! resource version at or below the last one seen for an entity is
//! ignored, and deleting an unknown entity is a no-op. Events whose
//! parent (queue for a job, job or node for a task) has not arrived yet
//! are buffered and retried a bounded number of times.

mod snapshot;

pub use snapshot::ClusterSnapshot;

use crate::decision::{Decision, DecisionGroup};
use crate::error::{Result, SchedulerError};
use crate::provider::JobStatus;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use starbug_core::{
    ClusterEvent, ClusterObject, JobId, JobInfo, NodeId, NodeInfo, ObjectKey, QueueId, QueueInfo,
    TaskId, TaskInfo, WatchEvent, WatchEventType,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Configuration for the cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Retries an orphaned event gets before it is dropped
    pub orphan_retry_limit: u32,
    /// Maximum number of buffered orphaned events
    pub orphan_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            orphan_retry_limit: 5,
            orphan_capacity: 1024,
        }
    }
}

/// Outcome of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
enum Applied {
    Applied,
    Ignored,
    /// Parent entity missing (its key)
    Orphaned(String),
}

#[derive(Debug)]
struct Orphan {
    event: ClusterEvent,
    missing: String,
    attempts: u32,
}

#[derive(Debug, Default)]
struct CacheState {
    cluster: ClusterSnapshot,
    versions: HashMap<ObjectKey, u64>,
    /// Task to owning job, for moves and deletions
    task_jobs: HashMap<TaskId, JobId>,
    orphans: VecDeque<Orphan>,
    dropped: u64,
    synced: bool,
}

/// Result of assuming a decision group
#[derive(Debug, Default)]
pub struct Assumed {
    /// Decisions now reflected in the cache, in submission order
    pub accepted: Vec<Decision>,
    /// Decisions dropped, with the reason
    pub rejected: Vec<(Decision, SchedulerError)>,
}

/// Scheduler-side view of the cluster
pub struct SchedulerCache {
    state: RwLock<CacheState>,
    changed: Notify,
    config: CacheConfig,
}

impl SchedulerCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            changed: Notify::new(),
            config,
        }
    }

    /// Drain a provider watch stream until it ends or the token is cancelled
    pub async fn run(
        &self,
        mut stream: BoxStream<'static, WatchEvent>,
        token: CancellationToken,
    ) -> Result<()> {
        info!("Starting cache ingestion");
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Cache ingestion shutting down");
                    return Ok(());
                }
                next = stream.next() => match next {
                    Some(event) => self.apply(event).await,
                    None => {
                        warn!("Watch stream ended, cache is no longer synced");
                        self.state.write().await.synced = false;
                        self.changed.notify_one();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply one watch event
    pub async fn apply(&self, event: WatchEvent) {
        let mut state = self.state.write().await;
        match event {
            WatchEvent::Synced => {
                if !state.synced {
                    info!(
                        "Cache synced: {} nodes, {} queues, {} jobs",
                        state.cluster.nodes.len(),
                        state.cluster.queues.len(),
                        state.cluster.jobs.len()
                    );
                }
                state.synced = true;
            }
            WatchEvent::Changed(event) => {
                let key = event.object.key();
                match state.apply_event(&event) {
                    Applied::Applied => state.retry_orphans(&self.config),
                    Applied::Ignored => {
                        debug!("Ignored stale or duplicate event for {}", key);
                        return;
                    }
                    Applied::Orphaned(missing) => {
                        debug!("Buffering {} until {} appears", key, missing);
                        state.buffer_orphan(event, missing, &self.config);
                        return;
                    }
                }
            }
        }
        drop(state);
        self.changed.notify_one();
    }

    /// Wait until the cache has changed since the last call
    pub async fn changed(&self) {
        self.changed.notified().await
    }

    pub async fn is_synced(&self) -> bool {
        self.state.read().await.synced
    }

    /// Copy of the current state for one scheduling cycle
    pub async fn snapshot(&self) -> Result<ClusterSnapshot> {
        let state = self.state.read().await;
        if !state.synced {
            return Err(SchedulerError::CacheNotSynced);
        }
        Ok(state.cluster.clone())
    }

    /// Number of events currently waiting for a parent
    pub async fn orphan_count(&self) -> usize {
        self.state.read().await.orphans.len()
    }

    /// Number of events dropped because their parent never appeared
    pub async fn dropped_orphans(&self) -> u64 {
        self.state.read().await.dropped
    }

    /// Reflect a decision group in the cache ahead of the provider
    ///
    /// Each decision is validated against the latest state in order;
    /// invalid ones are rejected individually. A job whose bound count
    /// would end strictly between zero and its gang threshold loses all
    /// of its decisions in the group, and evictions are dropped when no
    /// bind survives.
    pub async fn assume(&self, group: &DecisionGroup) -> Assumed {
        let mut state = self.state.write().await;
        let mut candidates = group.decisions.clone();
        let mut rejected = Vec::new();

        loop {
            let mut scratch = state.cluster.clone();
            let mut accepted = Vec::new();
            for decision in candidates.drain(..) {
                match scratch.try_apply(&decision) {
                    Ok(()) => accepted.push(decision),
                    Err(e) => rejected.push((decision, e)),
                }
            }

            let broken = broken_gangs(&state.cluster, &scratch, &accepted);
            if broken.is_empty() {
                if !accepted.iter().any(Decision::is_bind) {
                    for decision in accepted.drain(..) {
                        let subject = format!("task {}", decision.task().uid);
                        rejected.push((
                            decision,
                            SchedulerError::invariant_violation(
                                subject,
                                "eviction without a matching placement",
                            ),
                        ));
                    }
                    return Assumed { accepted, rejected };
                }
                state.cluster = scratch;
                return Assumed { accepted, rejected };
            }

            for decision in accepted {
                if broken.contains(&decision.task().job) {
                    let job = decision.task().job.clone();
                    rejected.push((
                        decision,
                        SchedulerError::invariant_violation(
                            format!("job {}", job),
                            "decision would leave the job below its gang threshold",
                        ),
                    ));
                } else {
                    candidates.push(decision);
                }
            }
        }
    }

    /// Undo an assumed decision the provider refused
    pub async fn forget(&self, decision: &Decision) {
        let mut state = self.state.write().await;
        match state.cluster.revert(decision) {
            Ok(true) => debug!("Reverted assumed decision: {}", decision),
            Ok(false) => debug!("Decision already superseded: {}", decision),
            Err(e) => warn!("Failed to revert {}: {}", decision, e),
        }
    }

    /// Record a job status the provider accepted
    pub async fn record_job_status(&self, job: &JobId, status: &JobStatus) {
        let mut state = self.state.write().await;
        if let Some(info) = state.cluster.jobs.get_mut(job) {
            let info = Arc::make_mut(info);
            info.phase = status.phase;
            info.unschedulable_reason = status.unschedulable_reason.clone();
        }
    }
}

impl Default for SchedulerCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Jobs whose ready count would end strictly inside (0, min) after `after`
fn broken_gangs(
    before: &ClusterSnapshot,
    after: &ClusterSnapshot,
    decisions: &[Decision],
) -> BTreeSet<JobId> {
    let touched: BTreeSet<&JobId> = decisions.iter().map(|d| &d.task().job).collect();
    touched
        .into_iter()
        .filter(|job| {
            let Some(next) = after.jobs.get(*job) else {
                return false;
            };
            let ready = next.ready_task_num();
            let previous = before
                .jobs
                .get(*job)
                .map(|j| j.ready_task_num())
                .unwrap_or(0);
            ready > 0 && ready < next.min_available && ready != previous
        })
        .cloned()
        .collect()
}

impl CacheState {
    fn apply_event(&mut self, event: &ClusterEvent) -> Applied {
        let key = event.object.key();
        let version = event.object.resource_version();
        if version != 0 {
            if let Some(&known) = self.versions.get(&key) {
                if version <= known {
                    return Applied::Ignored;
                }
            }
        }

        let deleted = event.event_type == WatchEventType::Deleted;
        let outcome = match &event.object {
            ClusterObject::Node(node) if deleted => self.delete_node(&node.name),
            ClusterObject::Node(node) => self.upsert_node(node),
            ClusterObject::Queue(queue) if deleted => self.delete_queue(&queue.name),
            ClusterObject::Queue(queue) => self.upsert_queue(queue),
            ClusterObject::Job(job) if deleted => self.delete_job(&job.uid),
            ClusterObject::Job(job) => self.upsert_job(job),
            ClusterObject::Task(task) if deleted => self.delete_task(task),
            ClusterObject::Task(task) => self.upsert_task(task),
        };

        if outcome == Applied::Applied && version != 0 {
            self.versions.insert(key, version);
        }
        outcome
    }

    fn upsert_node(&mut self, spec: &NodeInfo) -> Applied {
        let entry = self
            .cluster
            .nodes
            .entry(spec.name.clone())
            .or_insert_with(|| Arc::new(NodeInfo::new(spec.name.clone(), spec.allocatable.clone())));
        let node = Arc::make_mut(entry);
        node.update_spec(spec);
        if node.is_overcommitted() {
            warn!(
                "Node {} is over-committed: used {}, allocatable {}",
                node.name,
                node.used(),
                node.allocatable
            );
        }
        Applied::Applied
    }

    fn delete_node(&mut self, name: &NodeId) -> Applied {
        if let Some(node) = self.cluster.nodes.remove(name) {
            let placed = node.tasks().count();
            if placed > 0 {
                warn!("Node {} deleted with {} tasks still placed", name, placed);
            }
        }
        Applied::Applied
    }

    fn upsert_queue(&mut self, spec: &QueueInfo) -> Applied {
        self.cluster
            .queues
            .insert(spec.name.clone(), Arc::new(spec.clone()));
        Applied::Applied
    }

    fn delete_queue(&mut self, name: &QueueId) -> Applied {
        if self.cluster.queues.remove(name).is_some() {
            let jobs = self
                .cluster
                .jobs
                .values()
                .filter(|j| &j.queue == name)
                .count();
            if jobs > 0 {
                warn!("Queue {} deleted while {} jobs still reference it", name, jobs);
            }
        }
        Applied::Applied
    }

    fn upsert_job(&mut self, spec: &JobInfo) -> Applied {
        if !self.cluster.queues.contains_key(&spec.queue) {
            return Applied::Orphaned(format!("Queue/{}", spec.queue));
        }
        let entry = self.cluster.jobs.entry(spec.uid.clone()).or_insert_with(|| {
            Arc::new(JobInfo::new(
                spec.uid.clone(),
                spec.queue.clone(),
                spec.min_available,
            ))
        });
        Arc::make_mut(entry).update_spec(spec);
        Applied::Applied
    }

    fn delete_job(&mut self, uid: &JobId) -> Applied {
        if let Some(job) = self.cluster.jobs.remove(uid) {
            for task in job.tasks() {
                self.task_jobs.remove(&task.uid);
                self.unplace(task);
            }
        }
        Applied::Applied
    }

    fn upsert_task(&mut self, task: &TaskInfo) -> Applied {
        if !self.cluster.jobs.contains_key(&task.job) {
            return Applied::Orphaned(format!("Job/{}", task.job));
        }
        if task.is_placed() {
            if let Some(node) = &task.node_name {
                if !self.cluster.nodes.contains_key(node) {
                    return Applied::Orphaned(format!("Node/{}", node));
                }
            }
        }

        // Drop the previous copy, which may live in another job
        let owner = self
            .task_jobs
            .get(&task.uid)
            .cloned()
            .unwrap_or_else(|| task.job.clone());
        if let Some(job) = self.cluster.jobs.get_mut(&owner) {
            if let Some(previous) = Arc::make_mut(job).remove_task(task.uid.as_str()) {
                self.unplace(&previous);
            }
        }

        if task.is_placed() {
            if let Some(node) = task.node_name.as_ref().and_then(|n| self.cluster.nodes.get_mut(n)) {
                let node = Arc::make_mut(node);
                if node.record_task(task) {
                    warn!(
                        "Node {} over-committed by task {}: used {}, allocatable {}",
                        node.name,
                        task.uid,
                        node.used(),
                        node.allocatable
                    );
                }
            }
        }

        let Some(job) = self.cluster.jobs.get_mut(&task.job) else {
            return Applied::Ignored;
        };
        if let Err(e) = Arc::make_mut(job).upsert_task(task.clone()) {
            warn!("Rejected task {}: {}", task.uid, e);
            return Applied::Ignored;
        }
        self.task_jobs.insert(task.uid.clone(), task.job.clone());
        Applied::Applied
    }

    fn delete_task(&mut self, task: &TaskInfo) -> Applied {
        let owner = self
            .task_jobs
            .remove(&task.uid)
            .unwrap_or_else(|| task.job.clone());
        if let Some(job) = self.cluster.jobs.get_mut(&owner) {
            if let Some(previous) = Arc::make_mut(job).remove_task(task.uid.as_str()) {
                self.unplace(&previous);
            }
        }
        Applied::Applied
    }

    fn unplace(&mut self, task: &TaskInfo) {
        if !task.is_placed() {
            return;
        }
        let Some(node) = task.node_name.as_ref().and_then(|n| self.cluster.nodes.get_mut(n)) else {
            return;
        };
        if let Err(e) = Arc::make_mut(node).remove_task(task.uid.as_str()) {
            warn!("Failed to remove task {} from node: {}", task.uid, e);
        }
    }

    fn buffer_orphan(&mut self, event: ClusterEvent, missing: String, config: &CacheConfig) {
        if self.orphans.len() >= config.orphan_capacity {
            if let Some(oldest) = self.orphans.pop_front() {
                let err = SchedulerError::orphan_dropped(
                    oldest.event.object.key().to_string(),
                    oldest.missing,
                    oldest.attempts,
                );
                error!("Orphan buffer full: {}", err);
                self.dropped += 1;
            }
        }
        self.orphans.push_back(Orphan {
            event,
            missing,
            attempts: 0,
        });
    }

    fn retry_orphans(&mut self, config: &CacheConfig) {
        let pending = std::mem::take(&mut self.orphans);
        for mut orphan in pending {
            match self.apply_event(&orphan.event) {
                Applied::Applied => {
                    debug!("Applied buffered event for {}", orphan.event.object.key());
                }
                Applied::Ignored => {}
                Applied::Orphaned(missing) => {
                    orphan.attempts += 1;
                    orphan.missing = missing;
                    if orphan.attempts >= config.orphan_retry_limit {
                        let err = SchedulerError::orphan_dropped(
                            orphan.event.object.key().to_string(),
                            orphan.missing,
                            orphan.attempts,
                        );
                        error!("{}", err);
                        self.dropped += 1;
                    } else {
                        self.orphans.push_back(orphan);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{InMemoryProvider, ProviderConfig};
    use crate::provider::ClusterStateProvider;
    use starbug_core::{JobPhase, Resource, TaskStatus};
    use std::time::Duration;

    fn added(object: ClusterObject) -> WatchEvent {
        WatchEvent::Changed(ClusterEvent::added(object))
    }

    fn versioned_task(id: &str, version: u64) -> TaskInfo {
        let mut task = TaskInfo::new(id, "default/a", Resource::cpu(1));
        task.resource_version = version;
        task
    }

    async fn seeded_cache() -> SchedulerCache {
        let cache = SchedulerCache::default();
        cache.apply(added(ClusterObject::Queue(QueueInfo::new("q")))).await;
        cache
            .apply(added(ClusterObject::Node(NodeInfo::new("n1", Resource::cpu(4)))))
            .await;
        cache
            .apply(added(ClusterObject::Job(JobInfo::new("default/a", "q", 2))))
            .await;
        cache.apply(WatchEvent::Synced).await;
        cache
    }

    #[tokio::test]
    async fn test_snapshot_requires_sync() {
        let cache = SchedulerCache::default();
        assert!(matches!(
            cache.snapshot().await,
            Err(SchedulerError::CacheNotSynced)
        ));
        cache.apply(WatchEvent::Synced).await;
        assert!(cache.snapshot().await.is_ok());
    }

    #[tokio::test]
    async fn test_stale_and_duplicate_events_ignored() {
        let cache = seeded_cache().await;
        let placed = versioned_task("t1", 5).placed("n1", TaskStatus::Running);
        cache.apply(added(ClusterObject::Task(placed.clone()))).await;
        cache.apply(added(ClusterObject::Task(placed))).await;

        // Older version arrives late
        cache
            .apply(WatchEvent::Changed(ClusterEvent::modified(ClusterObject::Task(
                versioned_task("t1", 3),
            ))))
            .await;

        let snap = cache.snapshot().await.unwrap();
        assert_eq!(snap.nodes["n1"].used(), &Resource::cpu(1));
        let task = snap.task(&JobId::from("default/a"), "t1").unwrap();
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[tokio::test]
    async fn test_task_move_updates_both_nodes() {
        let cache = seeded_cache().await;
        cache
            .apply(added(ClusterObject::Node(NodeInfo::new("n2", Resource::cpu(4)))))
            .await;
        cache
            .apply(added(ClusterObject::Task(
                versioned_task("t1", 10).placed("n1", TaskStatus::Running),
            )))
            .await;
        cache
            .apply(WatchEvent::Changed(ClusterEvent::modified(ClusterObject::Task(
                versioned_task("t1", 11).placed("n2", TaskStatus::Running),
            ))))
            .await;

        let snap = cache.snapshot().await.unwrap();
        assert!(snap.nodes["n1"].used().is_empty());
        assert_eq!(snap.nodes["n2"].used(), &Resource::cpu(1));

        cache
            .apply(WatchEvent::Changed(ClusterEvent::deleted(ClusterObject::Task(
                versioned_task("t1", 12),
            ))))
            .await;
        let snap = cache.snapshot().await.unwrap();
        assert!(snap.nodes["n2"].used().is_empty());
        assert_eq!(snap.jobs["default/a"].task_count(), 0);
    }

    #[tokio::test]
    async fn test_orphans_wait_for_parent() {
        let cache = seeded_cache().await;
        let orphan = TaskInfo::new("t9", "default/late", Resource::cpu(1));
        cache.apply(added(ClusterObject::Task(orphan))).await;
        assert_eq!(cache.orphan_count().await, 1);

        cache
            .apply(added(ClusterObject::Job(JobInfo::new("default/late", "q", 1))))
            .await;
        assert_eq!(cache.orphan_count().await, 0);
        let snap = cache.snapshot().await.unwrap();
        assert_eq!(snap.jobs["default/late"].task_count(), 1);
    }

    #[tokio::test]
    async fn test_orphans_dropped_after_retry_limit() {
        let cache = SchedulerCache::new(CacheConfig {
            orphan_retry_limit: 2,
            orphan_capacity: 8,
        });
        cache.apply(added(ClusterObject::Queue(QueueInfo::new("q")))).await;
        cache
            .apply(added(ClusterObject::Job(JobInfo::new("default/x", "missing", 1))))
            .await;
        assert_eq!(cache.orphan_count().await, 1);

        for i in 0..2 {
            cache
                .apply(added(ClusterObject::Node(NodeInfo::new(
                    format!("n{}", i),
                    Resource::cpu(1),
                ))))
                .await;
        }
        assert_eq!(cache.orphan_count().await, 0);
        assert_eq!(cache.dropped_orphans().await, 1);
    }

    #[tokio::test]
    async fn test_orphan_capacity_bound() {
        let cache = SchedulerCache::new(CacheConfig {
            orphan_retry_limit: 5,
            orphan_capacity: 2,
        });
        for i in 0..3 {
            cache
                .apply(added(ClusterObject::Task(TaskInfo::new(
                    format!("t{}", i),
                    "default/none",
                    Resource::cpu(1),
                ))))
                .await;
        }
        assert_eq!(cache.orphan_count().await, 2);
        assert_eq!(cache.dropped_orphans().await, 1);
    }

    #[tokio::test]
    async fn test_assume_enforces_gang_threshold() {
        let cache = seeded_cache().await;
        cache
            .apply(added(ClusterObject::Task(versioned_task("t1", 20))))
            .await;
        cache
            .apply(added(ClusterObject::Task(
                TaskInfo::new("t2", "default/a", Resource::cpu(8)).placed("n1", TaskStatus::Failed),
            )))
            .await;

        // Only one task of a min-2 gang can be bound
        let group = DecisionGroup::new(
            "allocate",
            vec![Decision::Bind {
                task: versioned_task("t1", 20),
                node: NodeId::from("n1"),
            }],
        );
        let assumed = cache.assume(&group).await;
        assert!(assumed.accepted.is_empty());
        assert_eq!(assumed.rejected.len(), 1);

        let snap = cache.snapshot().await.unwrap();
        assert!(snap.nodes["n1"].used().is_empty());
    }

    #[tokio::test]
    async fn test_assume_and_forget_bind() {
        let cache = seeded_cache().await;
        cache
            .apply(added(ClusterObject::Job(JobInfo::new("default/b", "q", 1))))
            .await;
        let task = TaskInfo::new("b1", "default/b", Resource::cpu(2));
        cache.apply(added(ClusterObject::Task(task.clone()))).await;

        let bind = Decision::Bind {
            task,
            node: NodeId::from("n1"),
        };
        let assumed = cache
            .assume(&DecisionGroup::new("allocate", vec![bind.clone()]))
            .await;
        assert_eq!(assumed.accepted.len(), 1);
        let snap = cache.snapshot().await.unwrap();
        assert_eq!(snap.nodes["n1"].used(), &Resource::cpu(2));

        cache.forget(&bind).await;
        let snap = cache.snapshot().await.unwrap();
        assert!(snap.nodes["n1"].used().is_empty());
        assert_eq!(
            snap.task(&JobId::from("default/b"), "b1").unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_record_job_status() {
        let cache = seeded_cache().await;
        cache
            .record_job_status(
                &JobId::from("default/a"),
                &JobStatus {
                    phase: JobPhase::Inqueue,
                    unschedulable_reason: None,
                },
            )
            .await;
        let snap = cache.snapshot().await.unwrap();
        assert_eq!(snap.jobs["default/a"].phase, JobPhase::Inqueue);
    }

    #[tokio::test]
    async fn test_run_ingests_provider_stream() {
        let provider = InMemoryProvider::default();
        provider.upsert_queue(QueueInfo::new("q")).await;
        provider
            .upsert_node(NodeInfo::new("n1", Resource::cpu(2)))
            .await;

        let cache = Arc::new(SchedulerCache::default());
        let token = CancellationToken::new();
        let stream = provider.watch().await.unwrap();
        let handle = {
            let cache = cache.clone();
            let token = token.clone();
            tokio::spawn(async move { cache.run(stream, token).await })
        };

        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.is_synced().await {
                cache.changed().await;
            }
        })
        .await
        .unwrap();

        provider
            .upsert_node(NodeInfo::new("n2", Resource::cpu(2)))
            .await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if cache.snapshot().await.unwrap().nodes.contains_key("n2") {
                    break;
                }
                cache.changed().await;
            }
        })
        .await
        .unwrap();

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_lagged_watch_unsyncs_cache() {
        let provider = InMemoryProvider::new(ProviderConfig { capacity: 2 });
        provider.upsert_queue(QueueInfo::new("q")).await;

        let cache = Arc::new(SchedulerCache::default());
        let stream = provider.watch().await.unwrap();
        for i in 0..5 {
            provider
                .upsert_node(NodeInfo::new(format!("n{}", i), Resource::cpu(2)))
                .await;
        }
        let handle = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.run(stream, CancellationToken::new()).await })
        };

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!cache.is_synced().await);
        assert!(matches!(
            cache.snapshot().await,
            Err(SchedulerError::CacheNotSynced)
        ));
    }
}
