use crate::conf::Arguments;
use crate::error::Result;
use crate::framework::{CapabilitySet, Session};
use serde::Deserialize;
use starbug_core::{JobId, JobInfo, TaskInfo};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

pub const NAME: &str = "gang";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct GangArguments {
    /// Job uid to the minimum it should be scheduled with instead
    pub min_available_override: BTreeMap<String, u32>,
}

/// All-or-nothing placement
///
/// A job is valid once it has at least `min_available` schedulable
/// tasks and ready once that many are placed. Victims are only taken
/// from a job while it keeps its threshold.
pub fn build(args: &Arguments) -> Result<CapabilitySet> {
    let args: GangArguments = args.parse(NAME)?;
    let overrides = Arc::new(args.min_available_override);

    Ok(CapabilitySet::new(NAME)
        .with_session_open(move |ssn| {
            for (uid, min) in overrides.iter() {
                if let Some(job) = ssn.jobs.get_mut(uid.as_str()) {
                    debug!("Job {} runs with min available {}", uid, min);
                    job.min_available = *min;
                }
            }
        })
        .with_job_valid(|_, job| {
            let valid = job.valid_task_num();
            if valid < job.min_available {
                Some(format!(
                    "job is not valid: {} of {} required tasks exist",
                    valid, job.min_available
                ))
            } else {
                None
            }
        })
        .with_job_ready(|_, job| gang_ready(job))
        .with_job_order(|_, a, b| gang_ready(a).cmp(&gang_ready(b)))
        .with_preemptable(victims)
        .with_reclaimable(victims))
}

fn gang_ready(job: &JobInfo) -> bool {
    job.ready_task_num() >= job.min_available
}

fn victims(ssn: &Session, _preemptor: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
    let mut taken: BTreeMap<JobId, u32> = BTreeMap::new();
    let mut admitted = Vec::new();
    for candidate in candidates {
        let Some(job) = ssn.job(&candidate.job) else {
            continue;
        };
        let count = taken.entry(candidate.job.clone()).or_default();
        let keeps_threshold = job.ready_task_num().saturating_sub(*count + 1) >= job.min_available;
        if job.min_available <= 1 || keeps_threshold {
            *count += 1;
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
    use std::cmp::Ordering;

    fn session(args: Arguments) -> Session {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q"))
            .with_node(node("n1", 8))
            .with_job(job("default/g", "q", 2).with_phase(JobPhase::Running))
            .with_job(job("default/h", "q", 3).with_phase(JobPhase::Inqueue))
            .with_task(task("g-0", "default/g", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("g-1", "default/g", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("g-2", "default/g", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("h-0", "default/h", 1))
            .unwrap();
        let set = build(&args).unwrap();
        Session::new(snapshot, vec![Tier::new(vec![set])])
    }

    #[test]
    fn test_validity_readiness_and_order() {
        let ssn = session(Arguments::default());
        let g = ssn.job("default/g").unwrap();
        let h = ssn.job("default/h").unwrap();
        assert!(ssn.job_valid(g).is_none());
        assert!(ssn.job_valid(h).unwrap().contains("not valid"));
        assert!(ssn.job_ready(g));
        assert!(!ssn.job_ready(h));
        assert_eq!(ssn.job_order(h, g), Ordering::Less);
    }

    #[test]
    fn test_victims_keep_threshold() {
        let ssn = session(Arguments::default());
        let preemptor = task("h-0", "default/h", 1);
        let candidates: Vec<TaskInfo> = ssn.job("default/g").unwrap().tasks().cloned().collect();
        // Three ready, min two: only one may go
        assert_eq!(ssn.preemptable(&preemptor, &candidates).len(), 1);
        assert_eq!(ssn.reclaimable(&preemptor, &candidates).len(), 1);
    }

    #[test]
    fn test_min_available_override() {
        let args = Arguments(
            serde_yaml::from_str("{ minAvailableOverride: { default/h: 1 } }").unwrap(),
        );
        let ssn = session(args);
        let h = ssn.job("default/h").unwrap();
        assert_eq!(h.min_available, 1);
        assert!(ssn.job_valid(h).is_none());
    }
}
