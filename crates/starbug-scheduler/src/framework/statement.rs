use crate::decision::{Decision, DecisionGroup};
use crate::error::Result;
use crate::framework::Session;
use starbug_core::{NodeId, TaskInfo, TaskStatus};
use std::ops::Deref;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
enum Operation {
    Allocate { pending: TaskInfo, node: NodeId },
    Evict { original: TaskInfo, reason: String },
    Migrate { original: TaskInfo, to: NodeId },
}

/// Speculative changes to a session that stand or fall together
///
/// Operations take effect on the session immediately so later checks
/// see them. [`Statement::commit`] turns them into one decision group;
/// dropping or discarding the statement undoes them in reverse order.
pub struct Statement<'a> {
    session: &'a mut Session,
    action: String,
    operations: Vec<Operation>,
}

impl<'a> Statement<'a> {
    pub fn new(session: &'a mut Session, action: impl Into<String>) -> Self {
        Self {
            session,
            action: action.into(),
            operations: Vec::new(),
        }
    }

    /// Place a pending task on a node
    pub fn allocate(&mut self, task: &TaskInfo, node: &NodeId) -> Result<()> {
        let pending = self.session.allocate_task(task, node)?;
        debug!("Allocated task {} to node {}", task.uid, node);
        self.operations.push(Operation::Allocate {
            pending,
            node: node.clone(),
        });
        Ok(())
    }

    /// Release a bound or running task
    pub fn evict(&mut self, task: &TaskInfo, reason: impl Into<String>) -> Result<()> {
        let original = self.session.evict_task(task)?;
        debug!("Evicting task {} from {:?}", task.uid, original.node_name);
        self.operations.push(Operation::Evict {
            original,
            reason: reason.into(),
        });
        Ok(())
    }

    /// Move a bound or running task to another node
    pub fn migrate(&mut self, task: &TaskInfo, to: &NodeId) -> Result<()> {
        let original = self.session.migrate_task(task, to)?;
        debug!("Migrating task {} to node {}", task.uid, to);
        self.operations.push(Operation::Migrate {
            original,
            to: to.clone(),
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Keep the changes and record them as one decision group
    ///
    /// Returns the number of decisions recorded.
    pub fn commit(mut self) -> usize {
        let operations = std::mem::take(&mut self.operations);
        if operations.is_empty() {
            return 0;
        }
        let mut decisions = Vec::with_capacity(operations.len());
        for operation in operations {
            match operation {
                Operation::Allocate { pending, node } => {
                    decisions.push(Decision::Bind { task: pending, node })
                }
                Operation::Evict { original, reason } => decisions.push(Decision::Evict {
                    task: original,
                    reason,
                }),
                Operation::Migrate { original, to } => {
                    let reason = format!("migrated to {}", to);
                    let mut pending = original.clone();
                    pending.node_name = None;
                    pending.status = TaskStatus::Pending;
                    decisions.push(Decision::Evict {
                        task: original,
                        reason,
                    });
                    decisions.push(Decision::Bind {
                        task: pending,
                        node: to,
                    });
                }
            }
        }
        let count = decisions.len();
        let group = DecisionGroup::new(self.action.clone(), decisions);
        debug!("Committed {} decisions for {}", count, self.action);
        self.session.record_group(group);
        count
    }

    /// Undo every change
    pub fn discard(self) {
        // Drop does the work
    }

    fn rollback(&mut self) {
        while let Some(operation) = self.operations.pop() {
            let outcome = match &operation {
                Operation::Allocate { pending, .. } => self.session.unallocate_task(pending),
                Operation::Evict { original, .. } => self.session.unevict_task(original),
                Operation::Migrate { original, .. } => self.session.unmigrate_task(original),
            };
            if let Err(e) = outcome {
                warn!("Failed to undo {:?}: {}", operation, e);
            }
        }
    }
}

impl Deref for Statement<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if !self.operations.is_empty() {
            debug!(
                "Discarding {} operations for {}",
                self.operations.len(),
                self.action
            );
            self.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ClusterSnapshot;
    use crate::testing::{job, node, queue, task};
    use starbug_core::{JobPhase, Resource};

    fn session() -> Session {
        let snapshot = ClusterSnapshot::new()
            .with_queue(queue("q"))
            .with_node(node("n1", 4))
            .with_node(node("n2", 4))
            .with_job(job("default/a", "q", 2).with_phase(JobPhase::Inqueue))
            .with_job(job("default/b", "q", 1).with_phase(JobPhase::Running))
            .with_task(task("a1", "default/a", 2))
            .unwrap()
            .with_task(task("a2", "default/a", 2))
            .unwrap()
            .with_task(task("b1", "default/b", 4).placed("n1", TaskStatus::Running))
            .unwrap();
        Session::new(snapshot, Vec::new())
    }

    fn pending(ssn: &Session, id: &str) -> TaskInfo {
        ssn.job("default/a").unwrap().task(id).unwrap().clone()
    }

    #[test]
    fn test_discard_restores_session() {
        let mut ssn = session();
        let a1 = pending(&ssn, "a1");
        let victim = ssn.job("default/b").unwrap().task("b1").unwrap().clone();
        {
            let mut stmt = Statement::new(&mut ssn, "preempt");
            stmt.evict(&victim, "preempted").unwrap();
            stmt.allocate(&a1, &NodeId::from("n1")).unwrap();
            assert_eq!(stmt.node("n1").unwrap().used(), &Resource::cpu(2));
            stmt.discard();
        }
        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(4));
        assert_eq!(pending(&ssn, "a1").status, TaskStatus::Pending);
        assert!(ssn.groups().is_empty());
    }

    #[test]
    fn test_commit_records_one_group() {
        let mut ssn = session();
        let a1 = pending(&ssn, "a1");
        let a2 = pending(&ssn, "a2");
        let victim = ssn.job("default/b").unwrap().task("b1").unwrap().clone();

        let mut stmt = Statement::new(&mut ssn, "preempt");
        stmt.evict(&victim, "preempted").unwrap();
        stmt.allocate(&a1, &NodeId::from("n1")).unwrap();
        stmt.allocate(&a2, &NodeId::from("n1")).unwrap();
        assert!(stmt.job_ready(stmt.job("default/a").unwrap()));
        assert_eq!(stmt.commit(), 3);

        let group = &ssn.groups()[0];
        assert_eq!(group.action, "preempt");
        assert!(group.decisions[0].is_evict());
        assert_eq!(group.binds().count(), 2);
        assert_eq!(ssn.node("n1").unwrap().used(), &Resource::cpu(4));
    }

    #[test]
    fn test_migrate_emits_evict_then_bind() {
        let mut ssn = session();
        let b1 = ssn.job("default/b").unwrap().task("b1").unwrap().clone();
        let mut stmt = Statement::new(&mut ssn, "shuffle");
        stmt.migrate(&b1, &NodeId::from("n2")).unwrap();
        stmt.commit();

        let group = &ssn.groups()[0];
        assert_eq!(group.decisions.len(), 2);
        assert_eq!(group.decisions[0].to_string(), "evict b1 from n1");
        assert_eq!(group.decisions[1].to_string(), "bind b1 to n2");
    }
}
