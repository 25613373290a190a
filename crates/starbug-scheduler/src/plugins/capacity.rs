use crate::conf::Arguments;
use crate::error::{Result, SchedulerError};
use crate::framework::{CapabilitySet, Session};
use crate::plugins::{cmp_f64, queue_share};
use serde::Deserialize;
use starbug_core::{QueueId, Resource, TaskInfo};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "capacity";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CapacityArguments {
    /// Queue name to a ceiling replacing the queue's own capability
    #[serde(alias = "perQueueCeilingOverride")]
    pub queue_ceiling_override: BTreeMap<String, BTreeMap<String, String>>,
}

/// Queue ceilings and deserved-share reclaim
///
/// A queue never grows past its capability, whether by allocation or by
/// admitting jobs. A queue below its deserved share may reclaim from
/// queues above theirs, but never pushes them below it.
pub fn build(args: &Arguments) -> Result<CapabilitySet> {
    let args: CapacityArguments = args.parse(NAME)?;
    let mut ceilings: BTreeMap<QueueId, Resource> = BTreeMap::new();
    for (queue, quantities) in &args.queue_ceiling_override {
        let ceiling = Resource::parse(quantities.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map_err(|e| SchedulerError::invalid_arguments(NAME, format!("queue {}: {}", queue, e)))?;
        ceilings.insert(QueueId::from(queue.as_str()), ceiling);
    }
    let ceilings = Arc::new(ceilings);
    let no_weights = Arc::new(BTreeMap::new());

    Ok(CapabilitySet::new(NAME)
        .with_session_open(move |ssn| {
            for (name, ceiling) in ceilings.iter() {
                if let Some(queue) = ssn.queues.get_mut(name) {
                    debug!("Queue {} capped at {}", name, ceiling);
                    queue.capability = Some(ceiling.clone());
                }
            }
        })
        .with_queue_order(move |ssn, a, b| {
            cmp_f64(
                queue_share(ssn, a, &no_weights),
                queue_share(ssn, b, &no_weights),
            )
        })
        .with_queue_allocatable(|ssn, queue, task| {
            let Some(attr) = ssn.queue_attr(queue) else {
                return false;
            };
            let Some(capability) = &attr.capability else {
                return true;
            };
            let mut future = attr.allocated.clone();
            future.add(&task.resreq);
            future.within_limit(capability)
        })
        .with_job_enqueueable(|ssn, job| {
            let Some(attr) = ssn.queue_attr(&job.queue) else {
                return false;
            };
            let Some(capability) = &attr.capability else {
                return true;
            };
            let mut future = attr.allocated.clone();
            future.add(&attr.inqueue);
            future.add(&job.min_request());
            future.within_limit(capability)
        })
        .with_reclaimable(reclaimable))
}

fn reclaimable(ssn: &Session, reclaimer: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
    let Some(own) = ssn
        .job(&reclaimer.job)
        .and_then(|j| ssn.queue_attr(&j.queue))
    else {
        return Vec::new();
    };
    let mut future = own.allocated.clone();
    future.add(&reclaimer.resreq);
    if !future.less_equal(&own.deserved) {
        debug!(
            "Queue {} would exceed its deserved {} by reclaiming",
            own.name, own.deserved
        );
        return Vec::new();
    }

    // Allocation of each victim queue as victims are taken
    let mut remaining: BTreeMap<QueueId, Resource> = BTreeMap::new();
    let mut admitted = Vec::new();
    for candidate in candidates {
        let Some(attr) = ssn
            .job(&candidate.job)
            .and_then(|j| ssn.queue_attr(&j.queue))
        else {
            continue;
        };
        let allocated = remaining
            .entry(attr.name.clone())
            .or_insert_with(|| attr.allocated.clone());
        if allocated.less_equal(&attr.deserved) {
            continue;
        }
        let after = allocated.saturating_sub(&candidate.resreq);
        let keeps_deserved = candidate
            .resreq
            .names()
            .all(|name| after.get(name) >= attr.deserved.get(name));
        if keeps_deserved {
            *allocated = after;
            admitted.push(candidate.clone());
        }
    }
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterSnapshot;
    use crate::framework::Tier;
    use crate::testing::{job, node, queue, task};
    use starbug_core::{JobPhase, TaskStatus};

    fn session(args: Arguments) -> Session {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q1").with_deserved(Resource::cpu(4)))
            .with_queue(queue("q2").with_deserved(Resource::cpu(4)))
            .with_queue(queue("capped").with_capability(Resource::cpu(3)))
            .with_node(node("n1", 8))
            .with_job(job("default/a", "q1", 1).with_phase(JobPhase::Running))
            .with_job(job("default/b", "q2", 1).with_phase(JobPhase::Inqueue))
            .with_job(job("default/c", "capped", 1).with_phase(JobPhase::Running))
            .with_task(task("a-0", "default/a", 3).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("a-1", "default/a", 3).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("b-0", "default/b", 2))
            .unwrap()
            .with_task(task("c-0", "default/c", 2).placed("n1", TaskStatus::Running))
            .unwrap();
        let set = build(&args).unwrap();
        Session::new(snapshot, vec![Tier::new(vec![set])])
    }

    #[test]
    fn test_queue_allocatable_respects_capability() {
        let ssn = session(Arguments::default());
        let capped = QueueId::from("capped");
        assert!(ssn.queue_allocatable(&capped, &task("c-1", "default/c", 1)));
        assert!(!ssn.queue_allocatable(&capped, &task("c-1", "default/c", 2)));
        // q1 has no capability
        assert!(ssn.queue_allocatable(&QueueId::from("q1"), &task("a-2", "default/a", 8)));
    }

    #[test]
    fn test_ceiling_override() {
        let args = Arguments(serde_yaml::from_str("{ queueCeilingOverride: { q2: { cpu: \"1\" } } }").unwrap());
        let ssn = session(args);
        let b = ssn.job("default/b").unwrap();
        assert_eq!(ssn.queue("q2").unwrap().capability, Some(Resource::cpu(1)));
        assert!(!ssn.job_enqueueable(b));

        let bad = Arguments(serde_yaml::from_str("{ queueCeilingOverride: { q2: { cpu: lots } } }").unwrap());
        assert!(build(&bad).is_err());
    }

    #[test]
    fn test_per_queue_ceiling_override_key() {
        let args = Arguments(
            serde_yaml::from_str("{ perQueueCeilingOverride: { q2: { cpu: \"2\" } } }").unwrap(),
        );
        let ssn = session(args);
        assert_eq!(ssn.queue("q2").unwrap().capability, Some(Resource::cpu(2)));
    }

    #[test]
    fn test_reclaim_keeps_victim_queue_at_deserved() {
        let ssn = session(Arguments::default());
        let reclaimer = ssn.job("default/b").unwrap().task("b-0").unwrap().clone();
        let candidates: Vec<TaskInfo> = ssn.job("default/a").unwrap().tasks().cloned().collect();
        // q1 holds 6 of its 4; taking one 3-cpu task would leave 3
        assert!(ssn.reclaimable(&reclaimer, &candidates).is_empty());

        let small = vec![task("a-2", "default/a", 2)];
        assert_eq!(ssn.reclaimable(&reclaimer, &small).len(), 1);
    }
}
