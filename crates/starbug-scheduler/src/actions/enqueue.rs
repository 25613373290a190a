use crate::actions::Action;
use crate::framework::Session;
use starbug_core::{JobId, JobPhase};
use tracing::{debug, info};

pub const NAME: &str = "enqueue";

/// Admits pending jobs into their queues
///
/// A job is admitted when its queue is open, the job is valid, its
/// minimum request fits in the cluster at all and every enqueue check
/// agrees. Jobs are considered in queue order, then job order.
pub struct Enqueue;

impl Action for Enqueue {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        let mut candidates: Vec<JobId> = ssn
            .jobs()
            .filter(|j| j.phase == JobPhase::Pending)
            .map(|j| j.uid.clone())
            .collect();
        if candidates.is_empty() {
            return;
        }

        candidates.sort_by(|a, b| match (ssn.job(a), ssn.job(b)) {
            (Some(a), Some(b)) => ssn
                .queue_order(&a.queue, &b.queue)
                .then_with(|| ssn.job_order(a, b)),
            _ => a.cmp(b),
        });

        let mut admitted = 0;
        for id in candidates {
            let Some(job) = ssn.job(&id) else {
                continue;
            };

            let verdict = match ssn.queue(&job.queue) {
                None => Err(format!("queue {} not found", job.queue)),
                Some(queue) if !queue.is_open() => {
                    Err(format!("queue {} is {}", queue.name, queue.state))
                }
                Some(_) => match ssn.job_valid(job) {
                    Some(reason) => Err(reason),
                    None if !job.min_request().less_equal(ssn.total_allocatable()) => Err(format!(
                        "minimum request {} exceeds cluster capacity {}",
                        job.min_request(),
                        ssn.total_allocatable()
                    )),
                    None if !ssn.job_enqueueable(job) => {
                        Err(format!("queue {} cannot admit the job", job.queue))
                    }
                    None => Ok(()),
                },
            };

            match verdict {
                Ok(()) => {
                    debug!("Enqueued job {}", id);
                    if ssn.enqueue_job(&id).is_ok() {
                        admitted += 1;
                    }
                }
                Err(reason) => {
                    debug!("Job {} stays pending: {}", id, reason);
                    ssn.set_unschedulable(&id, reason);
                }
            }
        }

        if admitted > 0 {
            info!("Enqueued {} jobs", admitted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterSnapshot;
    use crate::testing::{job, node, queue, task, tiers};
    use starbug_core::{QueueState, Resource};

    #[test]
    fn test_enqueue_checks_queue_and_capacity() {
        let mut closed = queue("closed");
        closed.state = QueueState::Closed;
        let snapshot = ClusterSnapshot::new()
            .with_node(node("n1", 4))
            .with_queue(queue("open"))
            .with_queue(closed)
            .with_queue(queue("capped").with_capability(Resource::cpu(1)))
            .with_job(job("default/ok", "open", 1))
            .with_job(job("default/huge", "open", 1))
            .with_job(job("default/shut", "closed", 1))
            .with_job(job("default/over", "capped", 1))
            .with_job(job("default/empty", "open", 1))
            .with_task(task("ok-0", "default/ok", 2))
            .unwrap()
            .with_task(task("huge-0", "default/huge", 8))
            .unwrap()
            .with_task(task("shut-0", "default/shut", 1))
            .unwrap()
            .with_task(task("over-0", "default/over", 2))
            .unwrap();

        let mut ssn = Session::new(snapshot, tiers(&[&["gang"], &["drf", "capacity"]]));
        Enqueue.execute(&mut ssn);

        let phase = |id: &str| ssn.job(id).unwrap().phase;
        assert_eq!(phase("default/ok"), JobPhase::Inqueue);
        assert_eq!(phase("default/huge"), JobPhase::Pending);
        assert_eq!(phase("default/shut"), JobPhase::Pending);
        assert_eq!(phase("default/over"), JobPhase::Pending);
        assert_eq!(phase("default/empty"), JobPhase::Pending);

        let reason = |id: &str| ssn.unschedulable_reason(&JobId::from(id)).unwrap().to_string();
        assert!(reason("default/shut").contains("Closed"));
        assert!(reason("default/huge").contains("exceeds cluster capacity"));
        assert!(reason("default/empty").contains("valid"));
        assert_eq!(ssn.queue_attr("open").unwrap().inqueue, Resource::cpu(2));
    }
}
