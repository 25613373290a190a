use crate::actions::allocate::next_job;
use crate::actions::victims::{evict_for_job, Scope};
use crate::actions::Action;
use crate::framework::Session;
use starbug_core::JobId;
use std::collections::BTreeSet;
use tracing::info;

pub const NAME: &str = "preempt";

/// Evicts lower-priority work in the same queue for starving jobs
///
/// A job starves while it is admitted but below its gang threshold.
/// Victims come from other jobs of the same queue and must pass every
/// preemption filter; evictions and the placements they enable are
/// committed together or not at all.
pub struct Preempt;

impl Action for Preempt {
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
            let committed = evict_for_job(ssn, &id, Scope::SameQueue, NAME);
            if committed > 0 {
                ssn.clear_unschedulable(&id);
            }
            decisions += committed;
        }
        if decisions > 0 {
            info!("Preemption committed {} decisions", decisions);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Allocate, Backfill, Enqueue};
    use crate::cache::ClusterSnapshot;
    use crate::decision::Decision;
    use crate::testing::{job, node, queue, task, tiers};
    use starbug_core::{JobPhase, NodeId, Resource, TaskStatus};

    fn run(ssn: &mut Session) {
        let actions: [&dyn Action; 4] = [&Enqueue, &Allocate, &Preempt, &Backfill];
        for action in actions {
            action.execute(ssn);
        }
    }

    #[test]
    fn test_high_priority_gang_preempts_whole_node() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("default"))
            .with_node(node("n1", 4))
            .with_job(job("default/a", "default", 2).with_priority(100))
            .with_job(
                job("default/b", "default", 1)
                    .with_priority(1)
                    .with_phase(JobPhase::Running),
            )
            .with_task(task("a-0", "default/a", 2))
            .unwrap()
            .with_task(task("a-1", "default/a", 2))
            .unwrap()
            .with_task(task("b-0", "default/b", 4).placed("n1", TaskStatus::Bound))
            .unwrap();

        let mut ssn = Session::new(
            snapshot,
            tiers(&[&["priority", "gang", "conformance"], &["drf", "predicates", "nodeorder"]]),
        );
        run(&mut ssn);

        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(4));
        assert_eq!(ssn.job("default/a").unwrap().count(TaskStatus::Allocated), 2);
        assert_eq!(
            ssn.job("default/b").unwrap().task("b-0").unwrap().status,
            TaskStatus::Releasing
        );

        assert_eq!(ssn.groups().len(), 1);
        let group = &ssn.groups()[0];
        assert_eq!(group.action, NAME);
        let kinds: Vec<bool> = group
            .decisions
            .iter()
            .map(|d| matches!(d, Decision::Evict { .. }))
            .collect();
        assert_eq!(kinds, vec![true, false, false]);
    }

    #[test]
    fn test_equal_priority_is_not_preempted() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("default"))
            .with_node(node("n1", 4))
            .with_job(job("default/a", "default", 1).with_phase(JobPhase::Inqueue))
            .with_job(job("default/b", "default", 1).with_phase(JobPhase::Running))
            .with_task(task("a-0", "default/a", 2))
            .unwrap()
            .with_task(task("b-0", "default/b", 4).placed("n1", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(
            snapshot,
            tiers(&[&["priority", "gang", "conformance"], &["predicates"]]),
        );
        Preempt.execute(&mut ssn);
        assert!(ssn.groups().is_empty());
        assert_eq!(
            ssn.job("default/b").unwrap().task("b-0").unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    fn test_partial_gang_rolls_back_evictions() {
        // Two 4-cpu tasks need both nodes, but only n1 holds a victim
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("default"))
            .with_node(node("n1", 4))
            .with_node(node("n2", 4))
            .with_job(
                job("default/a", "default", 2)
                    .with_priority(100)
                    .with_phase(JobPhase::Inqueue),
            )
            .with_job(job("default/low", "default", 1).with_phase(JobPhase::Running))
            .with_job(
                job("default/top", "default", 1)
                    .with_priority(200)
                    .with_phase(JobPhase::Running),
            )
            .with_task(task("a-0", "default/a", 4))
            .unwrap()
            .with_task(task("a-1", "default/a", 4))
            .unwrap()
            .with_task(task("low-0", "default/low", 4).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("top-0", "default/top", 4).placed("n2", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(
            snapshot,
            tiers(&[&["priority", "gang", "conformance"], &["predicates"]]),
        );
        Preempt.execute(&mut ssn);
        assert!(ssn.groups().is_empty());
        assert_eq!(
            ssn.job("default/low").unwrap().task("low-0").unwrap().status,
            TaskStatus::Running
        );
        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(4));
    }

    fn evicted(ssn: &Session) -> (Vec<String>, Resource) {
        let mut ids = Vec::new();
        let mut total = Resource::new();
        for group in ssn.groups() {
            for decision in &group.decisions {
                if let Decision::Evict { task, .. } = decision {
                    ids.push(task.uid.to_string());
                    total.add(&task.resreq);
                }
            }
        }
        ids.sort();
        (ids, total)
    }

    #[test]
    fn test_preempts_least_resource_across_nodes() {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("default"))
            .with_node(node("big", 16))
            .with_node(node("small", 2))
            .with_job(
                job("default/hi", "default", 1)
                    .with_priority(50)
                    .with_phase(JobPhase::Inqueue),
            )
            .with_job(job("default/b", "default", 1).with_priority(1).with_phase(JobPhase::Running))
            .with_job(
                job("default/x", "default", 1)
                    .with_priority(100)
                    .with_phase(JobPhase::Running),
            )
            .with_job(job("default/c", "default", 1).with_priority(1).with_phase(JobPhase::Running))
            .with_task(task("hi-0", "default/hi", 2))
            .unwrap()
            .with_task(task("b-0", "default/b", 8).placed("big", TaskStatus::Running))
            .unwrap()
            .with_task(task("x-0", "default/x", 8).placed("big", TaskStatus::Running))
            .unwrap()
            .with_task(task("c-0", "default/c", 2).placed("small", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(
            snapshot,
            tiers(&[&["priority", "gang", "conformance"], &["predicates"]]),
        );
        Preempt.execute(&mut ssn);

        let (ids, total) = evicted(&ssn);
        assert_eq!(ids, vec!["c-0"]);
        assert_eq!(total, Resource::cpu(2));
        let hi = ssn.job("default/hi").unwrap().task("hi-0").unwrap();
        assert_eq!(hi.node_name, Some(NodeId::from("small")));
    }

    #[test]
    fn test_gang_preemption_evicts_least_total() {
        // Placing a-0 alone on n2 first would cost aa-0 and then b-0 too
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("default"))
            .with_node(node("n1", 4))
            .with_node(node("n2", 3))
            .with_job(
                job("default/a", "default", 2)
                    .with_priority(50)
                    .with_phase(JobPhase::Inqueue),
            )
            .with_job(job("default/b", "default", 1).with_priority(1).with_phase(JobPhase::Running))
            .with_job(
                job("default/aa", "default", 1)
                    .with_priority(1)
                    .with_phase(JobPhase::Running),
            )
            .with_task(task("a-0", "default/a", 2))
            .unwrap()
            .with_task(task("a-1", "default/a", 2))
            .unwrap()
            .with_task(task("b-0", "default/b", 4).placed("n1", TaskStatus::Running))
            .unwrap()
            .with_task(task("aa-0", "default/aa", 3).placed("n2", TaskStatus::Running))
            .unwrap();

        let mut ssn = Session::new(
            snapshot,
            tiers(&[&["priority", "gang", "conformance"], &["predicates"]]),
        );
        Preempt.execute(&mut ssn);

        let (ids, total) = evicted(&ssn);
        assert_eq!(ids, vec!["b-0"]);
        assert_eq!(total, Resource::cpu(4));
        assert_eq!(ssn.job("default/a").unwrap().count(TaskStatus::Allocated), 2);
        assert_eq!(ssn.node("n2").unwrap().used(), &Resource::cpu(3));
    }
}
