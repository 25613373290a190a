//! Victim selection shared by preempt and reclaim
//!
//! For a task that fits nowhere, every node whose predicate failures
//! are all resolvable is a candidate. On each one the evictable tasks
//! the plugins admit are searched for the cheapest set that frees
//! enough room. Sets are ranked by the resource they free (requests as
//! a fraction of the cluster's allocatable, summed over dimensions, so
//! the scale is the same on every node), then the fraction of their own
//! node they occupy, then highest victim priority, then summed priority,
//! then count, then victim names. The node with the cheapest set wins,
//! ties going to the lowest node name.
//!
//! A starving gang is planned as a whole: the per-task greedy placement
//! is compared against consolidating every task it still needs onto a
//! single node, and the plan freeing less is applied.

use crate::framework::{Session, Statement};
use starbug_core::{share, JobId, NodeId, NodeInfo, QueueId, Resource, TaskId, TaskInfo};
use std::cmp::Ordering;
use tracing::debug;

/// Largest candidate list searched exhaustively
const EXHAUSTIVE_LIMIT: usize = 12;

/// Which tasks may be taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// Tasks of other jobs in the preemptor's queue
    SameQueue,
    /// Tasks of jobs in other queues
    OtherQueues,
}

impl Scope {
    fn verb(self) -> &'static str {
        match self {
            Scope::SameQueue => "preempted",
            Scope::OtherQueues => "reclaimed",
        }
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    task: TaskInfo,
    priority: i32,
    /// Request over cluster allocatable
    freed: f64,
    /// Request over the hosting node's allocatable
    footprint: f64,
}

impl Candidate {
    fn new(ssn: &Session, task: TaskInfo, node: &NodeInfo) -> Self {
        Self {
            priority: priority(ssn, &task),
            freed: weight(&task.resreq, ssn.total_allocatable()),
            footprint: weight(&task.resreq, &node.allocatable),
            task,
        }
    }
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
struct Cost {
    freed: f64,
    footprint: f64,
    max_priority: i32,
    priority_sum: i64,
    count: usize,
    ids: Vec<TaskId>,
}

impl Cost {
    fn of(set: &[&Candidate]) -> Self {
        let mut ids: Vec<TaskId> = set.iter().map(|c| c.task.uid.clone()).collect();
        ids.sort();
        Self {
            freed: set.iter().map(|c| c.freed).sum(),
            footprint: set.iter().map(|c| c.footprint).sum(),
            max_priority: set.iter().map(|c| c.priority).max().unwrap_or(i32::MIN),
            priority_sum: set.iter().map(|c| c.priority as i64).sum(),
            count: set.len(),
            ids,
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other).unwrap_or(Ordering::Equal)
    }
}

/// Where to place a task and what to evict first
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub node: NodeId,
    pub victims: Vec<TaskInfo>,
}

/// Place a starving job's pending tasks by evicting victims
///
/// Returns the number of decisions committed.
pub(crate) fn evict_for_job(ssn: &mut Session, id: &JobId, scope: Scope, action: &str) -> usize {
    let Some(job) = ssn.job(id) else {
        return 0;
    };
    if ssn.job_valid(job).is_some() || !ssn.queue(&job.queue).is_some_and(|q| q.is_open()) {
        return 0;
    }
    let queue = job.queue.clone();
    let min = job.min_available;
    let needed = min.saturating_sub(job.ready_task_num()) as usize;
    let mut tasks: Vec<TaskInfo> = job
        .pending_tasks()
        .filter(|t| !t.backfillable)
        .cloned()
        .collect();
    tasks.sort_by(|a, b| ssn.task_order(a, b));
    if needed == 0 || tasks.len() < needed {
        return 0;
    }

    let consolidated = consolidate(ssn, &tasks[..needed], scope);

    let mut stmt = Statement::new(ssn, action);
    let victims = place_greedy(&mut stmt, id, &queue, min, &tasks, scope);
    let greedy =
        gang_placed(&stmt, id, min).then(|| Cost::of(&victims.iter().collect::<Vec<_>>()));
    let prefer_consolidated = match (&greedy, &consolidated) {
        (Some(greedy), Some((cost, _))) => cost.cmp(greedy) == Ordering::Less,
        (None, Some(_)) => true,
        _ => false,
    };
    if !prefer_consolidated {
        if greedy.is_some() {
            return stmt.commit();
        }
        stmt.discard();
        return 0;
    }
    stmt.discard();

    if let Some((_, plan)) = consolidated {
        let mut stmt = Statement::new(ssn, action);
        if apply_consolidated(&mut stmt, id, &queue, &plan, &tasks[..needed], scope)
            && gang_placed(&stmt, id, min)
        {
            debug!(
                "Job {} consolidated onto {} over {} victims",
                id,
                plan.node,
                plan.victims.len()
            );
            return stmt.commit();
        }
        debug!("Consolidated plan for job {} on {} failed", id, plan.node);
        stmt.discard();
    }
    if greedy.is_none() {
        return 0;
    }

    let mut stmt = Statement::new(ssn, action);
    place_greedy(&mut stmt, id, &queue, min, &tasks, scope);
    if gang_placed(&stmt, id, min) {
        stmt.commit()
    } else {
        stmt.discard();
        0
    }
}

fn gang_placed(ssn: &Session, id: &JobId, min: u32) -> bool {
    ssn.job(id).is_some_and(|j| j.ready_task_num() >= min && ssn.job_ready(j))
}

/// One task at a time, each taking its cheapest plan; returns the victims
fn place_greedy(
    stmt: &mut Statement,
    id: &JobId,
    queue: &QueueId,
    min: u32,
    tasks: &[TaskInfo],
    scope: Scope,
) -> Vec<Candidate> {
    let reason = format!("{} by {}", scope.verb(), id);
    let mut evicted = Vec::new();
    let mut remaining = tasks.len() as u32;
    for task in tasks {
        let ready = stmt.job(id).map(|j| j.ready_task_num()).unwrap_or(0);
        if ready >= min || ready + remaining < min {
            break;
        }
        remaining -= 1;

        if !stmt.queue_allocatable(queue, task) {
            continue;
        }
        if let Ok(node) = stmt.select_node(task) {
            if stmt.allocate(task, &node).is_ok() {
                continue;
            }
        }
        let Some(plan) = choose_victims(&**stmt, task, scope) else {
            debug!("No victims for task {} of job {}", task.uid, id);
            continue;
        };
        let Some(node) = stmt.node(&plan.node).cloned() else {
            break;
        };
        let mut ok = true;
        for victim in &plan.victims {
            if stmt.evict(victim, reason.as_str()).is_err() {
                ok = false;
                break;
            }
            evicted.push(Candidate::new(&**stmt, victim.clone(), &node));
        }
        if !ok || stmt.allocate(task, &plan.node).is_err() {
            debug!("Victim plan for task {} on {} failed", task.uid, plan.node);
            break;
        }
        debug!(
            "Task {} takes node {} from {} victims",
            task.uid,
            plan.node,
            plan.victims.len()
        );
    }
    evicted
}

/// Cheapest node that can host all of `gang` at once, with its victims
fn consolidate(ssn: &Session, gang: &[TaskInfo], scope: Scope) -> Option<(Cost, Plan)> {
    let first = gang.first()?;
    let own_queue = ssn.job(&first.job)?.queue.clone();
    let mut combined = Resource::new();
    for task in gang {
        combined.add(&task.resreq);
    }

    let mut best: Option<(Cost, Plan)> = None;
    for node in ssn.nodes() {
        if !gang.iter().all(|t| ssn.predicate(t, node).is_resolvable()) {
            continue;
        }
        let need = combined.saturating_sub(&node.idle());
        let set: Vec<Candidate> = if need.is_empty() {
            Vec::new()
        } else {
            let admitted = admitted(ssn, gang, node, &own_queue, scope);
            let Some(set) = minimal_set(&admitted, &need) else {
                continue;
            };
            set.into_iter().cloned().collect()
        };
        let cost = Cost::of(&set.iter().collect::<Vec<_>>());
        if best.as_ref().map_or(true, |(top, _)| cost.cmp(top) == Ordering::Less) {
            let plan = Plan {
                node: node.name.clone(),
                victims: set.into_iter().map(|c| c.task).collect(),
            };
            best = Some((cost, plan));
        }
    }
    best
}

fn apply_consolidated(
    stmt: &mut Statement,
    id: &JobId,
    queue: &QueueId,
    plan: &Plan,
    gang: &[TaskInfo],
    scope: Scope,
) -> bool {
    let reason = format!("{} by {}", scope.verb(), id);
    for victim in &plan.victims {
        if stmt.evict(victim, reason.as_str()).is_err() {
            return false;
        }
    }
    for task in gang {
        if !stmt.queue_allocatable(queue, task) || stmt.allocate(task, &plan.node).is_err() {
            return false;
        }
    }
    true
}

/// Tasks on `node` that every member of `preemptors` may take
fn admitted(
    ssn: &Session,
    preemptors: &[TaskInfo],
    node: &NodeInfo,
    own_queue: &QueueId,
    scope: Scope,
) -> Vec<Candidate> {
    let mut candidates: Vec<TaskInfo> = node
        .tasks()
        .filter(|t| t.status.is_evictable())
        .filter(|t| preemptors.iter().all(|p| p.job != t.job))
        .filter(|t| in_scope(ssn, t, own_queue, scope))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        priority(ssn, a)
            .cmp(&priority(ssn, b))
            .then_with(|| {
                weight(&a.resreq, ssn.total_allocatable())
                    .partial_cmp(&weight(&b.resreq, ssn.total_allocatable()))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.uid.cmp(&b.uid))
    });
    for preemptor in preemptors {
        candidates = match scope {
            Scope::SameQueue => ssn.preemptable(preemptor, &candidates),
            Scope::OtherQueues => ssn.reclaimable(preemptor, &candidates),
        };
    }
    candidates
        .into_iter()
        .map(|task| Candidate::new(ssn, task, node))
        .collect()
}

/// Cheapest node and victim set that make room for `preemptor`
pub(crate) fn choose_victims(ssn: &Session, preemptor: &TaskInfo, scope: Scope) -> Option<Plan> {
    let own_queue = ssn.job(&preemptor.job)?.queue.clone();
    let mut best: Option<(Cost, NodeId, Vec<TaskInfo>)> = None;

    for node in ssn.nodes() {
        if !ssn.predicate(preemptor, node).is_resolvable() {
            continue;
        }
        let need = preemptor.resreq.saturating_sub(&node.idle());
        if need.is_empty() {
            continue;
        }

        let admitted = admitted(ssn, std::slice::from_ref(preemptor), node, &own_queue, scope);
        let Some(set) = minimal_set(&admitted, &need) else {
            continue;
        };
        let cost = Cost::of(&set);
        let better = match &best {
            Some((top, _, _)) => cost.cmp(top) == Ordering::Less,
            None => true,
        };
        if better {
            let victims = set.iter().map(|c| c.task.clone()).collect();
            best = Some((cost, node.name.clone(), victims));
        }
    }

    best.map(|(_, node, victims)| Plan { node, victims })
}

fn in_scope(ssn: &Session, task: &TaskInfo, own_queue: &QueueId, scope: Scope) -> bool {
    let Some(job) = ssn.job(&task.job) else {
        return false;
    };
    match scope {
        Scope::SameQueue => &job.queue == own_queue,
        Scope::OtherQueues => &job.queue != own_queue,
    }
}

fn priority(ssn: &Session, task: &TaskInfo) -> i32 {
    ssn.job(&task.job).map_or(task.priority, |j| j.priority)
}

fn weight(request: &Resource, total: &Resource) -> f64 {
    request
        .iter()
        .map(|(name, value)| share(value, total.get(name)))
        .sum()
}

fn covers(set: &[&Candidate], need: &Resource) -> bool {
    let mut freed = Resource::new();
    for c in set {
        freed.add(&c.task.resreq);
    }
    need.less_equal(&freed)
}

/// Cheapest subset of `candidates` freeing at least `need`
fn minimal_set<'a>(candidates: &'a [Candidate], need: &Resource) -> Option<Vec<&'a Candidate>> {
    let all: Vec<&Candidate> = candidates.iter().collect();
    if !covers(&all, need) {
        return None;
    }

    if candidates.len() <= EXHAUSTIVE_LIMIT {
        let mut best: Option<(Cost, Vec<&Candidate>)> = None;
        for mask in 1u32..(1 << candidates.len()) {
            let set: Vec<&Candidate> = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, c)| c)
                .collect();
            if !covers(&set, need) {
                continue;
            }
            let cost = Cost::of(&set);
            if best.as_ref().map_or(true, |(top, _)| cost.cmp(top) == Ordering::Less) {
                best = Some((cost, set));
            }
        }
        return best.map(|(_, set)| set);
    }

    // Greedy in candidate order, then drop whatever is not needed
    let mut chosen: Vec<&Candidate> = Vec::new();
    for c in candidates {
        chosen.push(c);
        if covers(&chosen, need) {
            break;
        }
    }
    let mut i = chosen.len();
    while i > 0 {
        i -= 1;
        let mut without = chosen.clone();
        without.remove(i);
        if covers(&without, need) {
            chosen = without;
        }
    }
    Some(chosen)
}
