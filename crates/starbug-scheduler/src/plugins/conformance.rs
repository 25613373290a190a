use crate::conf::Arguments;
use crate::error::Result;
use crate::framework::{CapabilitySet, Session};
use starbug_core::TaskInfo;

pub const NAME: &str = "conformance";

const SYSTEM_NAMESPACE: &str = "kube-system";
const CRITICAL_CLASSES: [&str; 2] = ["system-cluster-critical", "system-node-critical"];

/// Keeps system-critical and opted-out tasks off every victim list
pub fn build(_args: &Arguments) -> Result<CapabilitySet> {
    Ok(CapabilitySet::new(NAME)
        .with_preemptable(evictable)
        .with_reclaimable(evictable))
}

fn evictable(_ssn: &Session, _preemptor: &TaskInfo, candidates: &[TaskInfo]) -> Vec<TaskInfo> {
    candidates
        .iter()
        .filter(|t| t.preemptable)
        .filter(|t| t.namespace != SYSTEM_NAMESPACE)
        .filter(|t| {
            !t.priority_class
                .as_deref()
                .is_some_and(|class| CRITICAL_CLASSES.contains(&class))
        })
        .cloned()
        .collect()
}
