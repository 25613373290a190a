use crate::actions::Action;
use crate::framework::{Session, Statement};
use starbug_core::{JobId, JobInfo, TaskInfo};
use tracing::{debug, info};

pub const NAME: &str = "backfill";

/// Fills idle capacity left after allocation with best-effort tasks
///
/// Only tasks marked backfillable are considered, and only onto idle
/// resources; nothing is ever evicted.
pub struct Backfill;

impl Action for Backfill {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        let mut jobs: Vec<&JobInfo> = ssn
            .jobs()
            .filter(|j| j.phase.is_admitted())
            .filter(|j| j.pending_tasks().any(|t| t.backfillable))
            .collect();
        jobs.sort_by(|a, b| ssn.job_order(a, b));
        let ids: Vec<JobId> = jobs.into_iter().map(|j| j.uid.clone()).collect();

        let mut placed = 0;
        for id in ids {
            placed += backfill_job(ssn, &id);
        }
        if placed > 0 {
            info!("Backfilled {} tasks", placed);
        }
    }
}

fn backfill_job(ssn: &mut Session, id: &JobId) -> usize {
    let Some(job) = ssn.job(id) else {
        return 0;
    };
    if !ssn.queue(&job.queue).is_some_and(|q| q.is_open()) {
        return 0;
    }
    let queue = job.queue.clone();
    let mut tasks: Vec<TaskInfo> = job
        .pending_tasks()
        .filter(|t| t.backfillable)
        .cloned()
        .collect();
    tasks.sort_by(|a, b| ssn.task_order(a, b));

    let mut stmt = Statement::new(ssn, NAME);
    for task in &tasks {
        if !stmt.queue_allocatable(&queue, task) {
            continue;
        }
        match stmt.select_node(task) {
            Ok(node) => {
                if let Err(e) = stmt.allocate(task, &node) {
                    debug!("Failed to backfill task {}: {}", task.uid, e);
                }
            }
            Err(why) => debug!("No idle node for task {}: {}", task.uid, why),
        }
    }

    if stmt.job(id).is_some_and(|j| stmt.job_ready(j)) {
        stmt.commit()
    } else {
        stmt.discard();
        0
    }
}
