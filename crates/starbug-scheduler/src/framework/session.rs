use crate::cache::ClusterSnapshot;
use crate::decision::DecisionGroup;
use crate::error::{Result, SchedulerError};
use crate::framework::plugin::{CapabilitySet, FilterResult, SessionOpenFn, Tier, VictimFn};
use crate::framework::share::{effective_deserved, QueueDemand};
use crate::provider::JobStatus;
use starbug_core::{
    JobId, JobInfo, JobPhase, NodeId, NodeInfo, QueueId, QueueInfo, Resource, TaskInfo, TaskStatus,
};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Per-queue aggregates derived when a session opens
#[derive(Debug, Clone, PartialEq)]
pub struct QueueAttr {
    pub name: QueueId,
    pub weight: u32,
    /// Effective deserved share for this cycle
    pub deserved: Resource,
    pub capability: Option<Resource>,
    /// Requests of the queue's occupying tasks
    pub allocated: Resource,
    /// Requests of every non-terminal task in the queue
    pub request: Resource,
    /// Outstanding minimum requests of admitted jobs not yet running
    pub inqueue: Resource,
}

/// Marks the single open session; released on drop
#[derive(Debug)]
pub struct SessionGuard(Arc<AtomicBool>);

impl SessionGuard {
    /// Claim the flag, failing if another session holds it
    pub fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        if flag.swap(true, AtomicOrdering::SeqCst) {
            return Err(SchedulerError::SessionAlreadyOpen);
        }
        Ok(Self(flag.clone()))
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.store(false, AtomicOrdering::SeqCst);
    }
}

/// Mutable scheduling state for one cycle
///
/// Built from a snapshot; actions read it through the plugin-combining
/// methods below and change it only through a
/// [`Statement`](crate::framework::Statement). Nothing here is visible
/// outside the cycle until the driver submits the committed decision
/// groups.
#[derive(Debug)]
pub struct Session {
    pub uid: Uuid,
    pub(crate) jobs: BTreeMap<JobId, JobInfo>,
    pub(crate) nodes: BTreeMap<NodeId, NodeInfo>,
    pub(crate) queues: BTreeMap<QueueId, QueueInfo>,
    queue_attrs: BTreeMap<QueueId, QueueAttr>,
    total: Resource,
    tiers: Vec<Tier>,
    original: BTreeMap<JobId, JobStatus>,
    unschedulable: BTreeMap<JobId, String>,
    groups: Vec<DecisionGroup>,
    guard: Option<SessionGuard>,
}

impl Session {
    /// Open a session over a snapshot with resolved plugin tiers
    pub fn new(snapshot: ClusterSnapshot, tiers: Vec<Tier>) -> Self {
        let original = snapshot
            .jobs
            .values()
            .map(|job| {
                (
                    job.uid.clone(),
                    JobStatus {
                        phase: job.phase,
                        unschedulable_reason: job.unschedulable_reason.clone(),
                    },
                )
            })
            .collect();

        let mut session = Self {
            uid: Uuid::new_v4(),
            jobs: snapshot
                .jobs
                .into_iter()
                .map(|(k, v)| (k, JobInfo::clone(&v)))
                .collect(),
            nodes: snapshot
                .nodes
                .into_iter()
                .map(|(k, v)| (k, NodeInfo::clone(&v)))
                .collect(),
            queues: snapshot
                .queues
                .into_iter()
                .map(|(k, v)| (k, QueueInfo::clone(&v)))
                .collect(),
            queue_attrs: BTreeMap::new(),
            total: Resource::new(),
            tiers: Vec::new(),
            original,
            unschedulable: BTreeMap::new(),
            groups: Vec::new(),
            guard: None,
        };

        let hooks: Vec<SessionOpenFn> = tiers
            .iter()
            .flat_map(|t| t.plugins.iter())
            .filter_map(|p| p.on_session_open.clone())
            .collect();
        for hook in hooks {
            hook(&mut session);
        }

        session.refresh_attrs();
        session.tiers = tiers;
        debug!(
            "Opened session {}: {} nodes, {} jobs, {} queues, total {}",
            session.uid,
            session.nodes.len(),
            session.jobs.len(),
            session.queues.len(),
            session.total
        );
        session
    }

    /// Attach the open-session marker
    pub fn with_guard(mut self, guard: SessionGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    fn refresh_attrs(&mut self) {
        self.total = Resource::new();
        for node in self.nodes.values() {
            self.total.add(&node.allocatable);
        }

        let mut attrs: BTreeMap<QueueId, QueueAttr> = self
            .queues
            .values()
            .map(|q| {
                (
                    q.name.clone(),
                    QueueAttr {
                        name: q.name.clone(),
                        weight: q.weight,
                        deserved: Resource::new(),
                        capability: q.capability.clone(),
                        allocated: Resource::new(),
                        request: Resource::new(),
                        inqueue: Resource::new(),
                    },
                )
            })
            .collect();

        for job in self.jobs.values() {
            let Some(attr) = attrs.get_mut(&job.queue) else {
                continue;
            };
            attr.allocated.add(job.allocated());
            attr.request.add(&job.total_request());
            if job.phase == JobPhase::Inqueue && !job.is_ready() {
                attr.inqueue
                    .add(&job.min_request().saturating_sub(job.allocated()));
            }
        }

        let demands: Vec<QueueDemand> = self
            .queues
            .values()
            .map(|q| QueueDemand {
                name: q.name.clone(),
                weight: q.weight,
                deserved: q.deserved.clone(),
                capability: q.capability.clone(),
                request: attrs
                    .get(&q.name)
                    .map(|a| a.request.clone())
                    .unwrap_or_default(),
            })
            .collect();
        for (name, deserved) in effective_deserved(&demands, &self.total) {
            if let Some(attr) = attrs.get_mut(&name) {
                attr.deserved = deserved;
            }
        }
        self.queue_attrs = attrs;
    }

    pub fn job<Q>(&self, id: &Q) -> Option<&JobInfo>
    where
        JobId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.jobs.get(id)
    }

    pub fn node<Q>(&self, id: &Q) -> Option<&NodeInfo>
    where
        NodeId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.nodes.get(id)
    }

    pub fn queue<Q>(&self, id: &Q) -> Option<&QueueInfo>
    where
        QueueId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.queues.get(id)
    }

    pub fn queue_attr<Q>(&self, id: &Q) -> Option<&QueueAttr>
    where
        QueueId: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.queue_attrs.get(id)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &JobInfo> {
        self.jobs.values()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueInfo> {
        self.queues.values()
    }

    /// Sum of allocatable over all nodes
    pub fn total_allocatable(&self) -> &Resource {
        &self.total
    }

    /// Decision groups committed so far
    pub fn groups(&self) -> &[DecisionGroup] {
        &self.groups
    }

    /// Reason recorded this cycle for a job that could not be placed
    pub fn unschedulable_reason(&self, job: &JobId) -> Option<&str> {
        self.unschedulable.get(job).map(String::as_str)
    }

    fn plugins(&self) -> impl Iterator<Item = &CapabilitySet> {
        self.tiers.iter().flat_map(|t| t.plugins.iter())
    }

    /// Compare two jobs: first non-equal plugin verdict, then age, then id
    pub fn job_order(&self, a: &JobInfo, b: &JobInfo) -> Ordering {
        for plugin in self.plugins() {
            if let Some(f) = &plugin.job_order {
                let ord = f(self, a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.uid.cmp(&b.uid))
    }

    /// Compare two queues: first non-equal plugin verdict, then name
    pub fn queue_order(&self, a: &QueueId, b: &QueueId) -> Ordering {
        for plugin in self.plugins() {
            if let Some(f) = &plugin.queue_order {
                let ord = f(self, a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        a.cmp(b)
    }

    /// Compare two tasks: first non-equal plugin verdict, then age, then id
    pub fn task_order(&self, a: &TaskInfo, b: &TaskInfo) -> Ordering {
        for plugin in self.plugins() {
            if let Some(f) = &plugin.task_order {
                let ord = f(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
        a.creation_timestamp
            .cmp(&b.creation_timestamp)
            .then_with(|| a.uid.cmp(&b.uid))
    }

    /// Evaluate every predicate for a node
    ///
    /// The node passes only if all predicates pass. The first failure
    /// supplies the reason; the result is unresolvable if any failure
    /// is. A node the task does not fit on never passes, whatever the
    /// configured predicates.
    pub fn predicate(&self, task: &TaskInfo, node: &NodeInfo) -> FilterResult {
        let mut result = FilterResult::pass(node.name.clone());
        for plugin in self.plugins() {
            if let Some(f) = &plugin.predicate {
                let verdict = f(self, task, node);
                if verdict.passed {
                    continue;
                }
                if result.passed {
                    result = verdict;
                } else if verdict.unresolvable {
                    result.unresolvable = true;
                }
            }
        }
        if result.passed && !task.resreq.less_equal(&node.idle()) {
            result = FilterResult::fail(node.name.clone(), "insufficient resources");
        }
        result
    }

    /// Per-tier score sums for a node
    pub fn node_score(&self, task: &TaskInfo, node: &NodeInfo) -> Vec<f64> {
        self.tiers
            .iter()
            .map(|tier| {
                tier.plugins
                    .iter()
                    .filter_map(|p| p.node_order.as_ref())
                    .map(|f| f(self, task, node))
                    .sum()
            })
            .collect()
    }

    /// Best feasible node for a task
    ///
    /// Scores are compared tier by tier; equal scores go to the lowest
    /// node name. The error summarises why each node was filtered out.
    pub fn select_node(&self, task: &TaskInfo) -> std::result::Result<NodeId, String> {
        let mut best: Option<(Vec<f64>, &NodeId)> = None;
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();

        for node in self.nodes.values() {
            let verdict = self.predicate(task, node);
            if !verdict.passed {
                let reason = verdict.reason.unwrap_or_else(|| "filtered".to_string());
                *failures.entry(reason).or_default() += 1;
                continue;
            }
            let score = self.node_score(task, node);
            let better = match &best {
                Some((top, _)) => compare_scores(&score, top) == Ordering::Greater,
                None => true,
            };
            if better {
                best = Some((score, &node.name));
            }
        }

        match best {
            Some((_, name)) => Ok(name.clone()),
            None => {
                let detail = failures
                    .iter()
                    .map(|(reason, count)| format!("{} {}", count, reason))
                    .collect::<Vec<_>>()
                    .join(", ");
                Err(format!(
                    "0/{} nodes are available: {}",
                    self.nodes.len(),
                    detail
                ))
            }
        }
    }

    /// Whether a job's current placements may be committed
    pub fn job_ready(&self, job: &JobInfo) -> bool {
        self.plugins()
            .filter_map(|p| p.job_ready.as_ref())
            .all(|f| f(self, job))
    }

    /// Reason a job cannot be scheduled this cycle, if any
    pub fn job_valid(&self, job: &JobInfo) -> Option<String> {
        self.plugins()
            .filter_map(|p| p.job_valid.as_ref())
            .find_map(|f| f(self, job))
    }

    /// Whether the queue can absorb the task
    pub fn queue_allocatable(&self, queue: &QueueId, task: &TaskInfo) -> bool {
        self.plugins()
            .filter_map(|p| p.queue_allocatable.as_ref())
            .all(|f| f(self, queue, task))
    }

    /// Whether a pending job may be admitted
    pub fn job_enqueueable(&self, job: &JobInfo) -> bool {
        self.plugins()
            .filter_map(|p| p.job_enqueueable.as_ref())
            .all(|f| f(self, job))
    }

    /// Candidates every preemption filter allows evicting for `preemptor`
    pub fn preemptable(&self, preemptor: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
        self.filter_victims(preemptor, candidates, |p| p.preemptable.as_ref())
    }

    /// Candidates every reclaim filter allows evicting for `reclaimer`
    pub fn reclaimable(&self, reclaimer: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
        self.filter_victims(reclaimer, candidates, |p| p.reclaimable.as_ref())
    }

    // Each filter sees only what the previous ones admitted; no filter
    // at all admits nothing.
    fn filter_victims<F>(&self, preemptor: &TaskInfo, candidates: &[TaskInfo], pick: F) -> Vec<TaskInfo>
    where
        F: Fn(&CapabilitySet) -> Option<&VictimFn>,
    {
        let mut victims: Option<Vec<TaskInfo>> = None;
        for plugin in self.plugins() {
            if let Some(f) = pick(plugin) {
                let input = victims.as_deref().unwrap_or(candidates);
                let admitted = f(self, preemptor, input);
                victims = Some(admitted);
            }
        }
        victims.unwrap_or_default()
    }

    /// Admit a pending job into its queue
    pub(crate) fn enqueue_job(&mut self, id: &JobId) -> Result<()> {
        let job = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| SchedulerError::unknown_entity("Job", id.as_str()))?;
        job.phase = JobPhase::Inqueue;
        if let Some(attr) = self.queue_attrs.get_mut(&job.queue) {
            attr.inqueue
                .add(&job.min_request().saturating_sub(job.allocated()));
        }
        self.unschedulable.remove(id);
        Ok(())
    }

    /// Record why a job could not be placed this cycle
    pub(crate) fn set_unschedulable(&mut self, id: &JobId, reason: impl Into<String>) {
        self.unschedulable.insert(id.clone(), reason.into());
    }

    pub(crate) fn clear_unschedulable(&mut self, id: &JobId) {
        self.unschedulable.remove(id);
    }

    pub(crate) fn record_group(&mut self, group: DecisionGroup) {
        self.groups.push(group);
    }

    fn current_task(&self, task: &TaskInfo) -> Result<TaskInfo> {
        self.jobs
            .get(&task.job)
            .and_then(|j| j.task(task.uid.as_str()))
            .cloned()
            .ok_or_else(|| SchedulerError::unknown_entity("Task", task.uid.as_str()))
    }

    fn store_task(&mut self, task: TaskInfo) -> Result<()> {
        let job = self
            .jobs
            .get_mut(&task.job)
            .ok_or_else(|| SchedulerError::unknown_entity("Job", task.job.as_str()))?;
        job.upsert_task(task)?;
        Ok(())
    }

    fn queue_of(&self, task: &TaskInfo) -> Option<QueueId> {
        self.jobs.get(&task.job).map(|j| j.queue.clone())
    }

    fn adjust_queue(&mut self, task: &TaskInfo, grow: bool) {
        let Some(queue) = self.queue_of(task) else {
            return;
        };
        if let Some(attr) = self.queue_attrs.get_mut(&queue) {
            if grow {
                attr.allocated.add(&task.resreq);
            } else {
                attr.allocated = attr.allocated.saturating_sub(&task.resreq);
            }
        }
    }

    fn node_mut(&mut self, name: &NodeId) -> Result<&mut NodeInfo> {
        self.nodes
            .get_mut(name)
            .ok_or_else(|| SchedulerError::unknown_entity("Node", name.as_str()))
    }

    /// Place a pending task; returns the pending copy
    pub(crate) fn allocate_task(&mut self, task: &TaskInfo, node: &NodeId) -> Result<TaskInfo> {
        let current = self.current_task(task)?;
        if current.status != TaskStatus::Pending {
            return Err(SchedulerError::invariant_violation(
                format!("task {}", task.uid),
                format!("cannot allocate a task in status {}", current.status),
            ));
        }
        let mut placed = current.clone();
        placed.status = TaskStatus::Allocated;
        placed.node_name = Some(node.clone());

        self.node_mut(node)?.add_task(&placed)?;
        self.store_task(placed.clone())?;
        self.adjust_queue(&placed, true);
        Ok(current)
    }

    /// Undo [`Session::allocate_task`]
    pub(crate) fn unallocate_task(&mut self, pending: &TaskInfo) -> Result<()> {
        let current = self.current_task(pending)?;
        let node = match (&current.status, &current.node_name) {
            (TaskStatus::Allocated, Some(node)) => node.clone(),
            _ => {
                return Err(SchedulerError::invariant_violation(
                    format!("task {}", pending.uid),
                    format!("cannot undo allocation of a task in status {}", current.status),
                ))
            }
        };
        self.node_mut(&node)?.remove_task(current.uid.as_str())?;
        self.store_task(pending.clone())?;
        self.adjust_queue(&current, false);
        Ok(())
    }

    /// Release a bound or running task; returns the original copy
    pub(crate) fn evict_task(&mut self, task: &TaskInfo) -> Result<TaskInfo> {
        let current = self.current_task(task)?;
        let node = match &current.node_name {
            Some(node) if current.status.is_evictable() => node.clone(),
            _ => {
                return Err(SchedulerError::invariant_violation(
                    format!("task {}", task.uid),
                    format!("cannot evict a task in status {}", current.status),
                ))
            }
        };
        self.node_mut(&node)?.remove_task(current.uid.as_str())?;
        let mut releasing = current.clone();
        releasing.status = TaskStatus::Releasing;
        self.store_task(releasing)?;
        self.adjust_queue(&current, false);
        Ok(current)
    }

    /// Undo [`Session::evict_task`]
    pub(crate) fn unevict_task(&mut self, original: &TaskInfo) -> Result<()> {
        let current = self.current_task(original)?;
        if current.status != TaskStatus::Releasing {
            return Err(SchedulerError::invariant_violation(
                format!("task {}", original.uid),
                format!("cannot undo eviction of a task in status {}", current.status),
            ));
        }
        let node = original
            .node_name
            .clone()
            .ok_or_else(|| SchedulerError::internal_error("evicted task without node"))?;
        self.node_mut(&node)?.add_task(original)?;
        self.store_task(original.clone())?;
        self.adjust_queue(original, true);
        Ok(())
    }

    /// Move a bound or running task to another node; returns the original copy
    pub(crate) fn migrate_task(&mut self, task: &TaskInfo, to: &NodeId) -> Result<TaskInfo> {
        let current = self.current_task(task)?;
        let from = match &current.node_name {
            Some(node) if current.status.is_evictable() && node != to => node.clone(),
            _ => {
                return Err(SchedulerError::invariant_violation(
                    format!("task {}", task.uid),
                    format!("cannot migrate a task in status {} to {}", current.status, to),
                ))
            }
        };
        let mut moved = current.clone();
        moved.status = TaskStatus::Allocated;
        moved.node_name = Some(to.clone());

        self.node_mut(to)?.add_task(&moved)?;
        self.node_mut(&from)?.remove_task(current.uid.as_str())?;
        self.store_task(moved)?;
        Ok(current)
    }

    /// Undo [`Session::migrate_task`]
    pub(crate) fn unmigrate_task(&mut self, original: &TaskInfo) -> Result<()> {
        let current = self.current_task(original)?;
        let (to, from) = match (&current.node_name, &original.node_name) {
            (Some(to), Some(from)) if current.status == TaskStatus::Allocated => {
                (to.clone(), from.clone())
            }
            _ => {
                return Err(SchedulerError::invariant_violation(
                    format!("task {}", original.uid),
                    format!("cannot undo migration of a task in status {}", current.status),
                ))
            }
        };
        self.node_mut(&to)?.remove_task(current.uid.as_str())?;
        self.node_mut(&from)?.add_task(original)?;
        self.store_task(original.clone())?;
        Ok(())
    }

    /// Committed groups and the job statuses that changed this cycle
    pub(crate) fn into_outcome(self) -> SessionOutcome {
        let mut updates = Vec::new();
        for job in self.jobs.values() {
            let phase = job.derived_phase();
            let original = self.original.get(&job.uid);
            let unschedulable_reason = match phase {
                JobPhase::Running | JobPhase::Completed => None,
                _ => self
                    .unschedulable
                    .get(&job.uid)
                    .cloned()
                    .or_else(|| original.and_then(|s| s.unschedulable_reason.clone())),
            };
            let status = JobStatus {
                phase,
                unschedulable_reason,
            };
            if original != Some(&status) {
                updates.push((job.clone(), status));
            }
        }
        SessionOutcome {
            groups: self.groups,
            updates,
            _guard: self.guard,
        }
    }
}

/// What a closed session hands to the driver
///
/// Holds the open-session marker until the outcome is submitted.
#[derive(Debug)]
pub(crate) struct SessionOutcome {
    pub groups: Vec<DecisionGroup>,
    pub updates: Vec<(JobInfo, JobStatus)>,
    _guard: Option<SessionGuard>,
}

/// Lexicographic comparison of per-tier scores
fn compare_scores(a: &[f64], b: &[f64]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        match x.partial_cmp(y) {
            Some(Ordering::Equal) | None => continue,
            Some(ord) => return ord,
        }
    }
    a.len().cmp(&b.len())
}
