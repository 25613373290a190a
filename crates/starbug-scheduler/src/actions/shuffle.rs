use crate::actions::Action;
use crate::conf::Arguments;
use crate::error::{Result, SchedulerError};
use crate::framework::{Session, Statement};
use serde::Deserialize;
use starbug_core::{JobId, NodeId, TaskInfo};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

pub const NAME: &str = "shuffle";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct ShuffleArguments {
    /// Nodes used below this fraction (and above zero) are drained
    pub low_utilization_threshold: f64,
}

impl Default for ShuffleArguments {
    fn default() -> Self {
        Self {
            low_utilization_threshold: 0.25,
        }
    }
}

/// Drains lightly used nodes onto busier ones
///
/// A node is drained only when every task on it can move; the moves of
/// one node form one decision group. Each migration counts against its
/// job like an eviction, so no gang drops below its threshold.
#[derive(Debug, Clone)]
pub struct Shuffle {
    threshold: f64,
}

impl Shuffle {
    pub fn new(args: &Arguments) -> Result<Self> {
        let parsed: ShuffleArguments = args.parse(NAME)?;
        let threshold = parsed.low_utilization_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(SchedulerError::invalid_arguments(
                NAME,
                format!("lowUtilizationThreshold must be in (0, 1], got {}", threshold),
            ));
        }
        Ok(Self { threshold })
    }
}

impl Action for Shuffle {
    fn name(&self) -> &str {
        NAME
    }

    fn execute(&self, ssn: &mut Session) {
        let mut drain: Vec<(f64, NodeId)> = ssn
            .nodes()
            .map(|n| (n.utilization(), n.name.clone()))
            .filter(|(u, _)| *u > 0.0 && *u < self.threshold)
            .collect();
        drain.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        let draining: BTreeSet<NodeId> = drain.iter().map(|(_, n)| n.clone()).collect();

        let mut drained = 0;
        for (_, name) in &drain {
            if drain_node(ssn, name, &draining) {
                drained += 1;
            }
        }
        if drained > 0 {
            info!("Shuffle drained {} nodes", drained);
        }
    }
}

fn drain_node(ssn: &mut Session, name: &NodeId, draining: &BTreeSet<NodeId>) -> bool {
    let Some(node) = ssn.node(name) else {
        return false;
    };
    let mut tasks: Vec<TaskInfo> = node.tasks().cloned().collect();
    if tasks.iter().any(|t| !t.status.is_evictable() || !t.preemptable) {
        debug!("Node {} holds tasks that cannot move", name);
        return false;
    }
    // Largest first packs better
    tasks.sort_by(|a, b| {
        b.resreq
            .iter()
            .map(|(_, v)| v)
            .sum::<i64>()
            .cmp(&a.resreq.iter().map(|(_, v)| v).sum::<i64>())
            .then_with(|| a.uid.cmp(&b.uid))
    });

    let mut moved: BTreeMap<JobId, u32> = BTreeMap::new();
    let mut stmt = Statement::new(ssn, NAME);
    for task in &tasks {
        let taken = moved.get(&task.job).copied().unwrap_or(0);
        if !may_move(&stmt, task, taken) {
            debug!("Moving task {} would break its gang", task.uid);
            stmt.discard();
            return false;
        }
        let Some(target) = pick_target(&stmt, task, draining) else {
            debug!("No target node for task {} from {}", task.uid, name);
            stmt.discard();
            return false;
        };
        if stmt.migrate(task, &target).is_err() {
            stmt.discard();
            return false;
        }
        *moved.entry(task.job.clone()).or_default() += 1;
    }

    debug!("Draining node {} of {} tasks", name, tasks.len());
    stmt.commit() > 0
}

// A job with min 1 may always move; otherwise it must keep its
// threshold outside the set being moved
fn may_move(ssn: &Session, task: &TaskInfo, taken: u32) -> bool {
    let Some(job) = ssn.job(&task.job) else {
        return false;
    };
    let ready = job.ready_task_num();
    job.min_available <= 1 || ready.saturating_sub(taken + 1) >= job.min_available
}

/// Busiest feasible node outside the drain set
fn pick_target(ssn: &Session, task: &TaskInfo, draining: &BTreeSet<NodeId>) -> Option<NodeId> {
    ssn.nodes()
        .filter(|n| !draining.contains(&n.name))
        .filter(|n| ssn.predicate(task, n).passed)
        .max_by(|a, b| {
            a.utilization()
                .partial_cmp(&b.utilization())
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.name.cmp(&a.name))
        })
        .map(|n| n.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterSnapshot;
    use crate::testing::{job, node, queue, task, tiers};
    use starbug_core::{JobPhase, Resource, TaskStatus};

    fn shuffle() -> Shuffle {
        Shuffle::new(&Arguments::default()).unwrap()
    }

    #[test]
    fn test_drains_onto_busiest_node() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q"))
            .with_node(node("n1", 8))
            .with_node(node("n2", 8))
            .with_node(node("n3", 8))
            .with_job(job("default/a", "q", 1).with_phase(JobPhase::Running))
            .with_job(job("default/b", "q", 1).with_phase(JobPhase::Running))
            .with_task(task("a-0", "default/a", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("b-0", "default/b", 4).placed("n2", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(snapshot, tiers(&[&["predicates", "nodeorder"]]));
        shuffle().execute(&mut ssn);

        assert!(ssn.node("n1").unwrap().used().is_empty());
        assert_eq!(ssn.node("n2").unwrap().used(), &Resource::cpu(5));
        assert!(ssn.node("n3").unwrap().used().is_empty());
        assert_eq!(ssn.groups().len(), 1);
        assert_eq!(ssn.groups()[0].evictions().count(), 1);
        assert_eq!(ssn.groups()[0].binds().count(), 1);
        assert!(ssn.job("default/a").unwrap().is_ready());
    }

    #[test]
    fn test_gang_keeps_threshold() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q"))
            .with_node(node("n1", 8))
            .with_node(node("n2", 8))
            .with_job(job("default/g", "q", 2).with_phase(JobPhase::Running))
            .with_job(job("default/b", "q", 1).with_phase(JobPhase::Running))
            .with_task(task("g-0", "default/g", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("g-1", "default/g", 1).placed("n2", TaskStatus::Running))
            .unwrap()
            .with_task(task("b-0", "default/b", 4).placed("n2", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(snapshot, tiers(&[&["predicates"]]));
        shuffle().execute(&mut ssn);
        assert!(ssn.groups().is_empty());
        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(1));
    }

    #[test]
    fn test_partial_drain_is_undone() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q"))
            .with_node(node("n1", 16))
            .with_node(node("n2", 8))
            .with_job(job("default/a", "q", 1).with_phase(JobPhase::Running))
            .with_job(job("default/b", "q", 1).with_phase(JobPhase::Running))
            .with_job(job("default/c", "q", 1).with_phase(JobPhase::Running))
            .with_task(task("a-0", "default/a", 2).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("a-1", "default/a", 1).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("c-0", "default/c", 6).placed("n2", TaskStatus::Running))
            .unwrap();

        // n2 has room for a-0 but not a-1 as well
        let mut ssn = Session::new(snapshot, tiers(&[&["predicates"]]));
        shuffle().execute(&mut ssn);
        assert!(ssn.groups().is_empty());
        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(3));
        assert_eq!(ssn.node("n2").unwrap().used(), &Resource::cpu(6));
    }

    #[test]
    fn test_threshold_is_validated() {
        let args = Arguments(serde_yaml::from_str("{ lowUtilizationThreshold: 1.5 }").unwrap());
        assert!(matches!(
            Shuffle::new(&args),
            Err(SchedulerError::InvalidArguments { .. })
        ));
    }
}
