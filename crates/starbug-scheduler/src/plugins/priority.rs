use crate::conf::Arguments;
use crate::error::Result;
use crate::framework::CapabilitySet;

pub const NAME: &str = "priority";

/// Higher priority first; only strictly lower-priority jobs are victims
pub fn build(_args: &Arguments) -> Result<CapabilitySet> {
    Ok(CapabilitySet::new(NAME)
        .with_job_order(|_, a, b| b.priority.cmp(&a.priority))
        .with_task_order(|a, b| b.priority.cmp(&a.priority))
        .with_preemptable(|ssn, preemptor, candidates| {
            let Some(job) = ssn.job(&preemptor.job) else {
                return Vec::new();
            };
            candidates
                .iter()
                .filter(|c| ssn.job(&c.job).map_or(c.priority, |j| j.priority) < job.priority)
                .cloned()
                .collect()
        }))
}
