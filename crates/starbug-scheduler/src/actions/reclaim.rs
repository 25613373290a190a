use crate::actions::allocate::next_job;
use crate::actions::victims::{evict_for_job, Scope};
use crate::actions::Action;
use crate::framework::{share, Session};
use starbug_core::{JobId, JobInfo};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const NAME: &str = "reclaim";

/// Takes resources back from queues running over their deserved share
///
/// Starving jobs of queues still below their deserved share may evict
/// tasks of other queues, subject to every reclaim filter.
pub struct Reclaim;

impl Action for Reclaim {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        let mut candidates: BTreeSet<JobId> = ssn
            .jobs()
            .filter(|j| j.phase.is_admitted())
            .filter(|j| j.ready_task_num() < j.min_available)
            .filter(|j| j.pending_tasks().any(|t| !t.backfillable))
            .map(|j| j.uid.clone())
            .collect();

        let mut decisions = 0;
        while let Some(id) = next_job(ssn, &candidates) {
            candidates.remove(&id);
            if !ssn.job(&id).is_some_and(|j| under_share(ssn, j)) {
                continue;
            }
            let committed = evict_for_job(ssn, &id, Scope::OtherQueues, NAME);
            if committed > 0 {
                ssn.clear_unschedulable(&id);
            }
            decisions += committed;
        }
        if decisions > 0 {
            info!("Reclaim committed {} decisions", decisions);
        }
    }
}

fn under_share(ssn: &Session, job: &JobInfo) -> bool {
    let Some(attr) = ssn.queue_attr(&job.queue) else {
        return false;
    };
    let used = share::dominant_share(&attr.allocated, &attr.deserved, &BTreeMap::new());
    if used >= 1.0 {
        debug!(
            "Queue {} is at {:.2} of its deserved share, not reclaiming",
            job.queue, used
        );
        return false;
    }
    true
}
