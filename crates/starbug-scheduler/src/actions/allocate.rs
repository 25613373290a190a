use crate::actions::Action;
use crate::framework::{Session, Statement};
use starbug_core::{JobId, TaskInfo};
use std::collections::BTreeSet;
use tracing::{debug, info};

pub const NAME: &str = "allocate";

/// Places pending tasks of admitted jobs onto idle capacity
///
/// The next job is picked by queue order, then job order, re-evaluated
/// after every job so that fairness reflects the placements just made.
/// A job's placements are committed together once it is ready and
/// discarded otherwise.
pub struct Allocate;

impl Action for Allocate {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        let mut candidates: BTreeSet<JobId> = ssn
            .jobs()
            .filter(|j| j.phase.is_admitted())
            .filter(|j| j.pending_tasks().any(|t| !t.backfillable))
            .map(|j| j.uid.clone())
            .collect();

        let mut placed = 0;
        while let Some(id) = next_job(ssn, &candidates) {
            candidates.remove(&id);
            placed += allocate_job(ssn, &id);
        }
        if placed > 0 {
            info!("Allocated {} tasks", placed);
        }
    }
}

/// Candidate that comes first by queue order, then job order
pub(crate) fn next_job(ssn: &Session, candidates: &BTreeSet<JobId>) -> Option<JobId> {
    candidates
        .iter()
        .filter_map(|id| ssn.job(id))
        .min_by(|a, b| {
            ssn.queue_order(&a.queue, &b.queue)
                .then_with(|| ssn.job_order(a, b))
        })
        .map(|j| j.uid.clone())
}

fn allocate_job(ssn: &mut Session, id: &JobId) -> usize {
    let Some(job) = ssn.job(id) else {
        return 0;
    };
    if let Some(reason) = ssn.job_valid(job) {
        ssn.set_unschedulable(id, reason);
        return 0;
    }
    if !ssn.queue(&job.queue).is_some_and(|q| q.is_open()) {
        let reason = format!("queue {} is not open", job.queue);
        ssn.set_unschedulable(id, reason);
        return 0;
    }

    let queue = job.queue.clone();
    let min = job.min_available;
    let mut tasks: Vec<TaskInfo> = job
        .pending_tasks()
        .filter(|t| !t.backfillable)
        .cloned()
        .collect();
    tasks.sort_by(|a, b| ssn.task_order(a, b));

    let mut stmt = Statement::new(ssn, NAME);
    let mut reason = None;
    let mut remaining = tasks.len() as u32;
    for task in &tasks {
        let ready = stmt.job(id).map(|j| j.ready_task_num()).unwrap_or(0);
        if ready + remaining < min {
            debug!(
                "Job {} can reach only {} of {} ready tasks, giving up",
                id,
                ready + remaining,
                min
            );
            break;
        }
        remaining -= 1;

        if !stmt.queue_allocatable(&queue, task) {
            reason = Some(format!("queue {} is over its capability", queue));
            continue;
        }
        match stmt.select_node(task) {
            Ok(node) => {
                if let Err(e) = stmt.allocate(task, &node) {
                    reason = Some(e.to_string());
                }
            }
            Err(why) => {
                debug!("No node for task {}: {}", task.uid, why);
                reason = Some(why);
            }
        }
    }

    let ready = stmt.job(id).is_some_and(|j| stmt.job_ready(j));
    if ready && !stmt.is_empty() {
        let count = stmt.commit();
        ssn.clear_unschedulable(id);
        return count;
    }
    stmt.discard();
    if !ready {
        let reason = reason.unwrap_or_else(|| format!("job needs {} ready tasks", min));
        ssn.set_unschedulable(id, reason);
    }
    0
}
